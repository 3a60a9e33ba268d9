//! The `ioa-controller` library crate provides a set of APIs for operating
//! the things exposed by a registry through natural-language requests.
//!
//! A thing is a networked device which exposes readable and writable
//! properties, invocable actions, and a channel that pushes its state
//! changes.
//!
//! Core functionalities of this crate include:
//!
//! - Listing the things of a registry, resolving a thing identifier to its
//!   position in the current registry snapshot, reading and writing thing
//!   properties, and invoking thing actions
//! - Subscribing to the update channel of a thing
//! - Choosing, through a text-generation channel, the thing that better
//!   satisfies a request
//! - Choosing, through a text-generation channel, the action of a thing that
//!   satisfies a request, validating the generated text before trusting it
//! - Sequencing the steps above into a single request-to-effect pipeline
//!
//! The registry membership may change between two calls, hence no thing
//! position is ever cached: each resolution fetches a fresh snapshot.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Thing and action selection through a text-generation channel.
pub mod agents;
/// Error management.
pub mod error;
/// The text-generation channel.
pub mod generation;
/// The pipeline turning a request into a thing action.
pub mod orchestrator;
/// A client for the registry of things.
pub mod registry;
/// Subscriptions to the update channel of a thing.
pub mod subscription;
