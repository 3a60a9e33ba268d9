use std::fmt;

use indexmap::IndexMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The schema of a thing action.
///
/// A schema is kept as an opaque JSON document: the controller renders it
/// and checks action membership by key, it never inspects parameter types.
pub type ActionSchema = Value;

/// Description of a thing.
///
/// It contains the thing identifier, a free-text description, and the
/// schema of every action the thing can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingDescriptor {
    /// Thing identifier, unique within a registry snapshot.
    pub id: String,
    /// Thing title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Thing description.
    #[serde(default)]
    pub description: String,
    /// Property descriptions.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Value>,
    /// Action schemas, keyed by action identifier.
    #[serde(default)]
    pub actions: IndexMap<String, ActionSchema>,
}

impl ThingDescriptor {
    /// Creates a [`ThingDescriptor`] without actions.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            description: description.into(),
            properties: IndexMap::new(),
            actions: IndexMap::new(),
        }
    }

    /// Sets the thing title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Adds a property description.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, description: Value) -> Self {
        let _ = self.properties.insert(name.into(), description);
        self
    }

    /// Adds an action schema.
    #[must_use]
    pub fn action(mut self, action_id: impl Into<String>, schema: ActionSchema) -> Self {
        let _ = self.actions.insert(action_id.into(), schema);
        self
    }

    /// Checks whether the thing exposes the given action.
    #[must_use]
    #[inline]
    pub fn has_action(&self, action_id: &str) -> bool {
        self.actions.contains_key(action_id)
    }

    /// Renders the action schemas as a compact JSON object.
    #[must_use]
    pub fn actions_json(&self) -> String {
        // A map of strings to JSON values is always serializable.
        serde_json::to_string(&self.actions).unwrap_or_else(|_| String::from("{}"))
    }
}

// A registry root may answer with a single thing or with a list of things.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Many(Vec<ThingDescriptor>),
    One(Box<ThingDescriptor>),
}

/// A snapshot of the things exposed by a registry.
///
/// The positions of the things inside a snapshot are only valid until the
/// next listing call, since the registry membership may change at any time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Things(Vec<ThingDescriptor>);

impl<'de> Deserialize<'de> for Things {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Listing::deserialize(deserializer)? {
            Listing::Many(things) => Self(things),
            Listing::One(thing) => Self(vec![*thing]),
        })
    }
}

impl Things {
    /// Creates an empty [`Things`] snapshot.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a [`Things`] snapshot from a list of [`ThingDescriptor`]s.
    #[must_use]
    #[inline]
    pub const fn from_things(things: Vec<ThingDescriptor>) -> Self {
        Self(things)
    }

    /// Returns the number of things.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks whether the snapshot is empty.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the [`ThingDescriptor`] at the given position.
    #[must_use]
    #[inline]
    pub fn get(&self, index: usize) -> Option<&ThingDescriptor> {
        self.0.get(index)
    }

    /// Returns the position of the first thing with the given identifier.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.0.iter().position(|thing| thing.id == id)
    }

    /// Returns the first [`ThingDescriptor`] with the given identifier.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&ThingDescriptor> {
        self.0.iter().find(|thing| thing.id == id)
    }

    /// Returns an iterator over the [`ThingDescriptor`]s.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, ThingDescriptor> {
        self.0.iter()
    }

    /// Returns the internal list of [`ThingDescriptor`]s.
    #[must_use]
    #[inline]
    pub fn into_inner(self) -> Vec<ThingDescriptor> {
        self.0
    }
}

impl IntoIterator for Things {
    type Item = ThingDescriptor;
    type IntoIter = std::vec::IntoIter<ThingDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Things {
    type Item = &'a ThingDescriptor;
    type IntoIter = std::slice::Iter<'a, ThingDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Renders the catalog of things, one `id: description` pair per line.
impl fmt::Display for Things {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, thing) in self.0.iter().enumerate() {
            if position > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", thing.id, thing.description)?;
        }
        Ok(())
    }
}
