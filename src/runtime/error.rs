//! Error types for the courier runtime
//!
//! Dispatch failures are surfaced as a single structured [`ActError`] carrying a
//! kind, a stable code and the original cause. Registration, storage and
//! lifecycle failures use dedicated `thiserror` enums.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Registration errors
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A plugin lifecycle hook failed
    #[error("Plugin '{name}' failed during {phase}: {source}")]
    Plugin {
        /// Full plugin name
        name: String,
        /// Lifecycle phase (`define`, `init`, `ready`, `close`)
        phase: &'static str,
        /// Underlying failure
        #[source]
        source: anyhow::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The runtime has been closed
    #[error("Runtime is closed")]
    Closed,
}

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised while parsing patterns or messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Pattern or message has no usable keys
    #[error("Pattern is empty")]
    Empty,

    /// A key is empty or contains a reserved character
    #[error("Invalid key '{0}'")]
    InvalidKey(String),

    /// A pattern value is not a scalar
    #[error("Invalid value for key '{key}': {detail}")]
    InvalidValue {
        /// Offending key
        key: String,
        /// Why the value was rejected
        detail: String,
    },

    /// Compact string syntax error
    #[error("Syntax error in '{input}': {detail}")]
    Syntax {
        /// Input text
        input: String,
        /// Description of the problem
        detail: String,
    },

    /// Message is not a JSON object
    #[error("Message must be an object, got {0}")]
    NotAnObject(String),
}

/// Errors raised by the registration (`add`) pipeline
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// The pattern could not be parsed
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    /// Strict mode rejected a pattern overlapping an existing one at equal specificity
    #[error("Pattern '{pattern}' is ambiguous with existing pattern '{existing}'")]
    Ambiguous {
        /// Canonical pattern being registered
        pattern: String,
        /// Canonical pattern it collides with
        existing: String,
    },

    /// Invalid validation rule declaration
    #[error("Invalid rules for '{pattern}': {detail}")]
    Rules {
        /// Canonical pattern
        pattern: String,
        /// Description of the problem
        detail: String,
    },

    /// A registration stage refused the definition
    #[error("Stage '{stage}' rejected '{pattern}': {detail}")]
    Rejected {
        /// Stage name
        stage: String,
        /// Canonical pattern
        pattern: String,
        /// Description of the problem
        detail: String,
    },

    /// The runtime has been closed
    #[error("Runtime is closed")]
    Closed,
}

/// Convenience result alias for registration operations
pub type RegistrationResult<T> = std::result::Result<T, RegistrationError>;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Atomic write failed
    #[error("Atomic write failed for {path}: {detail}")]
    AtomicWriteFailed {
        /// Path where write failed
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Kind of dispatch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActErrorKind {
    /// No registered pattern matches the message
    NotFound,
    /// The message failed the rules declared for the action
    Validation,
    /// No reply before the deadline
    Timeout,
    /// Call chain revisited a definition or exceeded the depth limit
    Loop,
    /// The handler failed or replied with an error
    Handler,
    /// A remote dispatch failed
    Transport,
    /// The runtime was closed
    Closed,
}

impl ActErrorKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Loop => "loop",
            Self::Handler => "handler",
            Self::Transport => "transport",
            Self::Closed => "closed",
        }
    }

    /// Code used when no explicit code is supplied
    pub fn default_code(&self) -> &'static str {
        match self {
            Self::NotFound => "act_not_found",
            Self::Validation => "invalid_msg",
            Self::Timeout => "action_timeout",
            Self::Loop => "act_loop",
            Self::Handler => "act_execute",
            Self::Transport => "transport_error",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ActErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured dispatch error delivered to `act` callers
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind} ({code}): {message}")]
pub struct ActError {
    /// Failure kind
    pub kind: ActErrorKind,
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Canonical pattern of the action involved, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Arbitrary structured details
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
    /// Original cause (not serialized)
    #[serde(skip)]
    cause: Option<Arc<anyhow::Error>>,
}

impl ActError {
    /// Create an error of the given kind with its default code
    pub fn new(kind: ActErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code().to_string(),
            message: message.into(),
            pattern: None,
            details: Value::Null,
            cause: None,
        }
    }

    /// No pattern matched
    pub fn not_found(summary: impl Into<String>) -> Self {
        Self::new(
            ActErrorKind::NotFound,
            format!("No matching action for {}", summary.into()),
        )
    }

    /// Validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ActErrorKind::Validation, message)
    }

    /// Deadline expired
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            ActErrorKind::Timeout,
            format!("Action did not reply within {}ms", timeout_ms),
        )
        .with_details(serde_json::json!({ "timeout_ms": timeout_ms }))
    }

    /// Loop or depth violation
    pub fn loop_detected(message: impl Into<String>) -> Self {
        Self::new(ActErrorKind::Loop, message)
    }

    /// Remote dispatch failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ActErrorKind::Transport, message)
    }

    /// Runtime closed
    pub fn closed() -> Self {
        Self::new(ActErrorKind::Closed, "Runtime is closed")
    }

    /// Normalize a handler failure.
    ///
    /// An `ActError` carried inside the anyhow error keeps its kind and code,
    /// anything else becomes a `handler` error retaining the original cause.
    pub fn from_handler(err: anyhow::Error) -> Self {
        if let Some(act_err) = err.downcast_ref::<ActError>() {
            return act_err.clone();
        }
        let mut normalized = Self::new(ActErrorKind::Handler, err.to_string());
        normalized.cause = Some(Arc::new(err));
        normalized
    }

    /// Override the code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Attach a canonical pattern (kept if one is already set)
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        if self.pattern.is_none() {
            self.pattern = Some(pattern.into());
        }
        self
    }

    /// Attach structured details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Original cause, if the error wraps a handler failure
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }

    /// Check the kind
    pub fn is(&self, kind: ActErrorKind) -> bool {
        self.kind == kind
    }
}

/// Convenience result alias for dispatch operations
pub type ActResult<T> = std::result::Result<T, ActError>;
