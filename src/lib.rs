//! Courier – a pattern-matched action dispatcher
//!
//! Callers submit loosely structured messages (flat JSON objects) and the
//! runtime routes each one to exactly one registered action:
//! - Patterns are canonicalized, so key order never affects identity
//! - The most specific matching pattern wins; ties go to the newest registration
//! - Re-registering a pattern overrides it, and the override can call its `prior`
//! - Registration and dispatch run through ordered, named stage pipelines
//! - Remote runtimes plug in through an NDJSON transport

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Runtime core: patterns, index, pipelines, delegates, plugins
pub mod runtime;

/// NDJSON service and client transport
pub mod service;

// Re-export key types for convenience
pub use runtime::action::{Action, ActionDefinition, Reply};
pub use runtime::delegate::Delegate;
pub use runtime::error::{ActError, ActErrorKind, ActResult, RegistrationError, RuntimeError};
pub use runtime::message::{IntoMessage, Message};
pub use runtime::pattern::{IntoPattern, Pattern};
pub use runtime::plugin::{FnPlugin, Plugin};
pub use runtime::rules::{Rule, Rules, ValueKind};
pub use runtime::transport::{LocalTransport, Transport};
pub use runtime::{Runtime, RuntimeConfig};

/// Current version of the courier runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for the NDJSON service
pub const PROTOCOL_VERSION: &str = "1.0.0";
