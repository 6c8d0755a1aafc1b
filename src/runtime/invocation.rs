//! Per-call invocation state
//!
//! An [`InvocationRecord`] lives for the duration of one dispatch. Call chains
//! (nested acts and prior calls) are tracked as a linked list of [`Frame`]s so
//! that cycles and runaway depth are caught before recursing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::action::ActionDefinition;
use super::error::ActError;
use super::message::{self, Message};

/// Unique identifier of one act call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    /// Create a new random ActionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Causal trace identifier shared by every act in one logical request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    /// Create a new random TraceId
    pub fn new() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(12);
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a frame was entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Resolved through the index
    Act,
    /// Reached through a prior call
    Prior,
}

/// One step of a call chain
#[derive(Debug)]
pub struct Frame {
    /// Definition being executed
    pub definition: String,
    /// Canonical pattern of that definition
    pub pattern: String,
    /// Fingerprint of the message it was called with
    pub fingerprint: String,
    /// How the frame was entered
    pub kind: FrameKind,
    /// Number of frames in the chain, this one included
    pub depth: usize,
    /// Calling frame
    pub parent: Option<Arc<Frame>>,
}

impl Frame {
    /// Check that entering `definition` with `fingerprint` neither revisits a
    /// frame of the chain nor exceeds `max_depth`, then push the new frame.
    pub fn enter(
        parent: Option<&Arc<Frame>>,
        definition: &ActionDefinition,
        fingerprint: &str,
        kind: FrameKind,
        max_depth: usize,
    ) -> Result<Arc<Frame>, ActError> {
        let depth = parent.map_or(0, |frame| frame.depth) + 1;
        if depth > max_depth {
            return Err(ActError::loop_detected(format!(
                "Call chain exceeded maximum depth {} at {}",
                max_depth,
                definition.canonical()
            ))
            .with_code("act_depth")
            .with_pattern(definition.canonical())
            .with_details(serde_json::json!({ "depth": depth, "max_depth": max_depth })));
        }

        if let Some(parent) = parent {
            let revisit = parent
                .chain()
                .find(|frame| frame.definition == definition.id() && frame.fingerprint == fingerprint);
            if let Some(frame) = revisit {
                return Err(ActError::loop_detected(format!(
                    "{} re-entered {} with the same message",
                    definition.canonical(),
                    frame.definition
                ))
                .with_pattern(definition.canonical())
                .with_details(serde_json::json!({
                    "definition": frame.definition,
                    "chain": parent.ids(),
                })));
            }
        }

        Ok(Arc::new(Frame {
            definition: definition.id().to_string(),
            pattern: definition.canonical().to_string(),
            fingerprint: fingerprint.to_string(),
            kind,
            depth,
            parent: parent.cloned(),
        }))
    }

    /// This frame followed by its ancestors
    pub fn chain(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(Some(self), |frame| frame.parent.as_deref())
    }

    /// Definition ids of the chain, innermost first
    pub fn ids(&self) -> Vec<String> {
        self.chain().map(|frame| frame.definition.clone()).collect()
    }
}

/// Ephemeral state of one dispatch
#[derive(Debug)]
pub struct InvocationRecord {
    /// Unique id of this call
    pub action_id: ActionId,
    /// Causal trace id
    pub trace: TraceId,
    /// Inbound message, meta keys included
    pub message: Message,
    /// Fingerprint of the inbound message
    pub fingerprint: String,
    /// Resolved definition
    pub definition: Option<Arc<ActionDefinition>>,
    /// Calling frame, when dispatched from inside a handler
    pub parent: Option<Arc<Frame>>,
    /// Deadline in milliseconds
    pub timeout_ms: u64,
    /// Wall-clock start
    pub started: DateTime<Utc>,
    /// Monotonic start
    pub started_at: Instant,
}

impl InvocationRecord {
    /// Create a record for an inbound message
    pub fn new(
        message: Message,
        parent: Option<Arc<Frame>>,
        trace: TraceId,
        default_timeout_ms: u64,
    ) -> Self {
        let fingerprint = message::fingerprint(&message);
        let timeout_ms = message::timeout_of(&message).unwrap_or(default_timeout_ms);
        Self {
            action_id: ActionId::new(),
            trace,
            message,
            fingerprint,
            definition: None,
            parent,
            timeout_ms,
            started: Utc::now(),
            started_at: Instant::now(),
        }
    }

    /// Canonical pattern of the resolved definition
    pub fn pattern(&self) -> Option<&str> {
        self.definition.as_ref().map(|def| def.canonical())
    }

    /// Milliseconds since the record was created
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeConfig};
    use crate::runtime::action::Action;
    use serde_json::json;

    fn definition(runtime: &Runtime, pattern: &str) -> Arc<ActionDefinition> {
        runtime
            .add(pattern, Action::sync(|_, _| Ok(json!({}))))
            .unwrap();
        runtime.find(pattern).unwrap()
    }

    #[test]
    fn test_revisit_same_message_is_a_loop() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let def = definition(&runtime, "a:1");

        let first = Frame::enter(None, &def, "fp", FrameKind::Act, 10).unwrap();
        let err = Frame::enter(Some(&first), &def, "fp", FrameKind::Act, 10).unwrap_err();
        assert_eq!(err.code, "act_loop");

        // Same definition with a different message is allowed
        assert!(Frame::enter(Some(&first), &def, "other", FrameKind::Act, 10).is_ok());
    }

    #[test]
    fn test_depth_limit() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let def = definition(&runtime, "a:1");

        let mut frame = Frame::enter(None, &def, "0", FrameKind::Act, 3).unwrap();
        frame = Frame::enter(Some(&frame), &def, "1", FrameKind::Act, 3).unwrap();
        frame = Frame::enter(Some(&frame), &def, "2", FrameKind::Act, 3).unwrap();
        let err = Frame::enter(Some(&frame), &def, "3", FrameKind::Act, 3).unwrap_err();
        assert_eq!(err.code, "act_depth");
        assert_eq!(frame.ids().len(), 3);
    }

    #[test]
    fn test_record_reads_timeout_directive() {
        let msg = json!({"a": 1, "timeout$": 25}).as_object().unwrap().clone();
        let record = InvocationRecord::new(msg, None, TraceId::new(), 1000);
        assert_eq!(record.timeout_ms, 25);
        assert!(record.pattern().is_none());
    }
}
