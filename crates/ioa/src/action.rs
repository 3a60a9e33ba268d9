use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The key which wraps the parameters of an action request.
pub const INPUT_KEY: &str = "input";

/// The invocation of a thing action.
///
/// It contains the action identifier and the input parameters passed to the
/// action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    /// Action identifier.
    pub action_id: String,
    /// Input parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ActionInvocation {
    /// Creates an [`ActionInvocation`] without parameters.
    #[must_use]
    pub fn new(action_id: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            parameters: Map::new(),
        }
    }

    /// Adds an input parameter.
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        let _ = self.parameters.insert(name.into(), value);
        self
    }

    /// Sets all input parameters at once.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Builds the action request body.
    ///
    /// The body has the form `{"<action_id>": {"input": {...}}}`.
    #[must_use]
    pub fn request_body(&self) -> Value {
        let mut input = Map::new();
        let _ = input.insert(INPUT_KEY.into(), Value::Object(self.parameters.clone()));

        let mut body = Map::new();
        let _ = body.insert(self.action_id.clone(), Value::Object(input));
        Value::Object(body)
    }
}

impl fmt::Display for ActionInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action_id)?;
        if !self.parameters.is_empty() {
            let parameters = serde_json::to_string(&self.parameters).map_err(|_| fmt::Error)?;
            write!(f, " {parameters}")?;
        }
        Ok(())
    }
}
