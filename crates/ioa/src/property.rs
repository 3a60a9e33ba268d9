use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The message kind which carries the updated state of a thing.
pub const PROPERTY_STATUS: &str = "propertyStatus";

/// The current state of a thing.
///
/// It maps every property name to its current value. A state is a
/// point-in-time snapshot, it is not updated when the thing changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyState(Map<String, Value>);

impl PropertyState {
    /// Creates an empty [`PropertyState`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Adds a property value.
    #[must_use]
    pub fn insert(mut self, name: impl Into<String>, value: Value) -> Self {
        let _ = self.0.insert(name.into(), value);
        self
    }

    /// Returns the value of the given property.
    #[must_use]
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns the number of properties.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks whether the state contains no properties.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the property names and values.
    #[inline]
    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.0.iter()
    }

    /// Returns the internal property map.
    #[must_use]
    #[inline]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for PropertyState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Renders the state as a flat JSON object.
impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

/// A message pushed by a thing over its update channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Message kind.
    #[serde(rename = "messageType")]
    pub message_type: String,
    /// Message payload.
    #[serde(default)]
    pub data: Value,
}

impl PushMessage {
    /// Creates a `propertyStatus` [`PushMessage`].
    #[must_use]
    pub fn property_status(state: PropertyState) -> Self {
        Self {
            message_type: PROPERTY_STATUS.into(),
            data: Value::Object(state.into_inner()),
        }
    }

    /// Checks whether the message carries a property state.
    #[must_use]
    #[inline]
    pub fn is_property_status(&self) -> bool {
        self.message_type == PROPERTY_STATUS
    }

    /// Converts a message into a [`PropertyState`].
    ///
    /// Returns [`None`] for other message kinds or when the payload
    /// is not a JSON object.
    #[must_use]
    pub fn into_property_state(self) -> Option<PropertyState> {
        if !self.is_property_status() {
            return None;
        }
        match self.data {
            Value::Object(map) => Some(PropertyState(map)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{deserialize, serialize};

    use super::{PropertyState, PushMessage};

    #[test]
    fn state_from_registry() {
        let state = deserialize::<PropertyState>(json!({
            "on": true,
            "brightness": 50,
        }));

        assert_eq!(state.get("on"), Some(&json!(true)));
        assert_eq!(state.get("brightness"), Some(&json!(50)));
        assert_eq!(state.get("color"), None);
        assert_eq!(state.len(), 2);
        assert_eq!(state.to_string(), r#"{"on":true,"brightness":50}"#);
    }

    #[test]
    fn property_status_message() {
        let message = deserialize::<PushMessage>(json!({
            "messageType": "propertyStatus",
            "data": { "humidity": 42.5 }
        }));

        assert!(message.is_property_status());
        assert_eq!(
            message.into_property_state(),
            Some(PropertyState::new().insert("humidity", json!(42.5)))
        );
    }

    #[test]
    fn other_messages() {
        let action_status = deserialize::<PushMessage>(json!({
            "messageType": "actionStatus",
            "data": { "fade": { "status": "completed" } }
        }));
        assert!(!action_status.is_property_status());
        assert_eq!(action_status.into_property_state(), None);

        let without_data = deserialize::<PushMessage>(json!({ "messageType": "event" }));
        assert_eq!(without_data.into_property_state(), None);

        let scalar = deserialize::<PushMessage>(json!({
            "messageType": "propertyStatus",
            "data": 3
        }));
        assert_eq!(scalar.into_property_state(), None);
    }

    #[test]
    fn outgoing_property_status() {
        let state = PropertyState::new().insert("on", json!(false));
        assert_eq!(
            serialize(PushMessage::property_status(state)),
            json!({ "messageType": "propertyStatus", "data": { "on": false } })
        );
    }
}
