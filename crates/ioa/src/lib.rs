//! The communication interface among a thing registry and its controller.
//!
//! This crate provides the data types to:
//!
//! - Decode the description of a thing, that is its identifier, a free-text
//!   description, and the schema of the actions it can run.
//! - Decode the current state of a thing, expressed as a set of named
//!   property values.
//! - Decode the messages pushed by a thing over its update channel.
//! - Encode the invocation of a thing action together with its input
//!   parameters.
//!
//! Data exchange between the registry and the controller requires structures
//! to be serializable and deserializable. All structures mirror the JSON
//! documents a registry sends and receives.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Action invocations.
pub mod action;
/// Property states and push messages.
pub mod property;
/// Thing descriptions.
pub mod thing;

#[cfg(test)]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
