//! Delegate context handed to handlers and plugins
//!
//! A delegate is a cheap, cloneable view of a runtime: shared services plus a
//! few scoped fields (fixed arguments, fixed meta keys, plugin identity, the
//! action currently executing). Deriving a delegate copies those fields into a
//! new record; a parent is never mutated by its children.

use serde_json::{Map, Value};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use tracing::debug;

use super::Services;
use super::action::{Action, ActionDefinition};
use super::error::{ActError, ActResult, PatternError, RegistrationResult};
use super::invocation::{Frame, TraceId};
use super::message::{IntoMessage, Message, is_meta_key};
use super::pattern::{IntoPattern, Pattern};
use super::pipeline::{self, AddSpec};
use super::plugin::{PluginIdentity, ReadyGate};
use super::registry::ListIter;
use super::rules::Rules;
use super::stats::StatsReport;

/// Scoped handle on a runtime
#[derive(Clone)]
pub struct Delegate {
    pub(crate) services: Arc<Services>,
    pub(crate) fixed: Arc<Message>,
    pub(crate) meta: Arc<Message>,
    pub(crate) plugin: PluginIdentity,
    pub(crate) gate: Option<ReadyGate>,
    pub(crate) current: Option<Arc<ActionDefinition>>,
    pub(crate) frame: Option<Arc<Frame>>,
    pub(crate) trace: Option<TraceId>,
}

impl Delegate {
    pub(crate) fn root(services: Arc<Services>) -> Self {
        Self {
            services,
            fixed: Arc::new(Message::new()),
            meta: Arc::new(Message::new()),
            plugin: PluginIdentity::root(),
            gate: None,
            current: None,
            frame: None,
            trace: None,
        }
    }

    /// Delegate scoped to a plugin being loaded
    pub(crate) fn for_plugin(&self, identity: PluginIdentity, gate: Option<ReadyGate>) -> Self {
        Self {
            plugin: identity,
            gate,
            current: None,
            frame: None,
            ..self.clone()
        }
    }

    /// Delegate handed to a handler while it executes `definition`
    pub(crate) fn within(
        &self,
        definition: Arc<ActionDefinition>,
        frame: Option<Arc<Frame>>,
        trace: TraceId,
    ) -> Self {
        Self {
            services: self.services.clone(),
            fixed: Arc::new(Message::new()),
            meta: self.meta.clone(),
            plugin: definition.plugin.clone(),
            gate: definition.gate.clone(),
            current: Some(definition),
            frame,
            trace: Some(trace),
        }
    }

    /// Register an action.
    ///
    /// Fixed arguments of this delegate are merged into the pattern.
    #[track_caller]
    pub fn add(&self, pattern: impl IntoMessage, action: Action) -> RegistrationResult<&Self> {
        self.register(pattern, None, action, Location::caller())
    }

    /// Register an action with validation rules
    #[track_caller]
    pub fn add_with_rules(
        &self,
        pattern: impl IntoMessage,
        rules: Rules,
        action: Action,
    ) -> RegistrationResult<&Self> {
        self.register(pattern, Some(rules), action, Location::caller())
    }

    fn register(
        &self,
        pattern: impl IntoMessage,
        rules: Option<Rules>,
        action: Action,
        location: &'static Location<'static>,
    ) -> RegistrationResult<&Self> {
        let raw = pattern.into_message()?;
        let spec = AddSpec::new(raw, action, rules, self, location);
        pipeline::register(&self.services, spec)?;
        Ok(self)
    }

    /// Dispatch a message and await its single result
    pub async fn act(&self, message: impl IntoMessage) -> ActResult<Value> {
        let message = message.into_message().map_err(|err| {
            ActError::validation(format!("Invalid message: {}", err)).with_code("invalid_msg")
        })?;
        pipeline::dispatch(self, self.compose(message)).await
    }

    /// Dispatch a message and hand the result to `callback`, exactly once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn act_with<F>(&self, message: impl IntoMessage, callback: F)
    where
        F: FnOnce(ActResult<Value>) + Send + 'static,
    {
        let delegate = self.clone();
        let message = message.into_message();
        tokio::spawn(async move {
            let result = match message {
                Ok(message) => delegate.act(message).await,
                Err(err) => Err(ActError::validation(format!("Invalid message: {}", err))),
            };
            callback(result);
        });
    }

    /// Dispatch a message without waiting; failures go to the runtime error handler
    pub fn act_detached(&self, message: impl IntoMessage) {
        let services = self.services.clone();
        self.act_with(message, move |result| {
            if let Err(err) = result {
                services.report(&err);
            }
        });
    }

    /// Call the definition the current action overrides.
    ///
    /// Replies `{}` when there is no earlier definition. Fails when called
    /// outside a handler.
    pub async fn prior(&self, message: impl IntoMessage) -> ActResult<Value> {
        let message = message
            .into_message()
            .map_err(|err| ActError::validation(format!("Invalid message: {}", err)))?;
        pipeline::call_prior(self, message).await
    }

    /// Derive a delegate whose acts and adds always carry `args`
    pub fn fix(&self, args: impl IntoMessage) -> Result<Self, PatternError> {
        let args = args.into_message()?;
        let mut fixed = Message::clone(&self.fixed);
        fixed.extend(args);
        debug!(plugin = %self.plugin, keys = fixed.len(), "derived delegate");
        Ok(Self {
            fixed: Arc::new(fixed),
            ..self.clone()
        })
    }

    /// Alias of [`Delegate::fix`]
    pub fn delegate(&self, args: impl IntoMessage) -> Result<Self, PatternError> {
        self.fix(args)
    }

    /// Derive a delegate adding default meta keys to every act
    pub fn with_meta(&self, meta: impl IntoMessage) -> Result<Self, PatternError> {
        let meta = meta.into_message()?;
        if let Some(key) = meta.keys().find(|key| !is_meta_key(key)) {
            return Err(PatternError::InvalidKey(key.clone()));
        }
        let mut merged = Message::clone(&self.meta);
        merged.extend(meta);
        Ok(Self {
            meta: Arc::new(merged),
            ..self.clone()
        })
    }

    /// Live definition registered at exactly this pattern
    pub fn find(&self, pattern: impl IntoPattern) -> Option<Arc<ActionDefinition>> {
        let pattern = pattern.into_pattern().ok()?;
        self.services.index.find(&pattern)
    }

    /// Whether a definition is registered at exactly this pattern
    pub fn has(&self, pattern: impl IntoPattern) -> bool {
        self.find(pattern).is_some()
    }

    /// Live definitions covering an optional partial query
    pub fn list(&self, query: Option<Pattern>) -> ListIter {
        self.services.index.list(query)
    }

    /// Current stats
    pub fn stats(&self) -> StatsReport {
        self.services.stats.report()
    }

    /// Plugin identity of this delegate
    pub fn plugin(&self) -> &PluginIdentity {
        &self.plugin
    }

    /// Definition being executed, inside a handler
    pub fn current(&self) -> Option<&Arc<ActionDefinition>> {
        self.current.as_ref()
    }

    /// Trace id of the act being executed, inside a handler
    pub fn trace(&self) -> Option<&TraceId> {
        self.trace.as_ref()
    }

    /// Fixed arguments
    pub fn fixed(&self) -> &Message {
        &self.fixed
    }

    /// Fixed meta keys
    pub fn meta(&self) -> &Message {
        &self.meta
    }

    /// Merge fixed arguments and meta into an outgoing message
    fn compose(&self, message: Message) -> Message {
        let mut composed: Map<String, Value> = message;
        for (key, value) in self.fixed.iter() {
            composed.insert(key.clone(), value.clone());
        }
        for (key, value) in self.meta.iter() {
            composed.entry(key.clone()).or_insert_with(|| value.clone());
        }
        composed
    }
}

impl fmt::Debug for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate")
            .field("plugin", &self.plugin.full_name)
            .field("fixed", &self.fixed)
            .field("meta", &self.meta)
            .field("current", &self.current.as_ref().map(|def| def.canonical()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeConfig};
    use serde_json::json;

    #[test]
    fn test_fix_is_copy_on_extend() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let root = runtime.root();
        let child = root.fix("role:tax").unwrap();
        let grandchild = child.fix("zone:eu").unwrap();

        assert!(root.fixed().is_empty());
        assert_eq!(child.fixed().len(), 1);
        assert_eq!(grandchild.fixed().len(), 2);
        assert_eq!(grandchild.fixed()["role"], json!("tax"));
    }

    #[test]
    fn test_fixed_args_join_added_patterns() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let tax = runtime.root().fix("role:tax").unwrap();
        tax.add("cmd:calc", Action::sync(|_, _| Ok(json!({})))).unwrap();

        assert!(runtime.root().has("role:tax,cmd:calc"));
        assert!(!runtime.root().has("cmd:calc"));
    }

    #[test]
    fn test_with_meta_requires_meta_keys() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let root = runtime.root();
        assert!(root.with_meta(json!({"timeout$": 5})).is_ok());
        assert!(root.with_meta(json!({"timeout": 5})).is_err());
    }

    #[test]
    fn test_compose_prefers_fixed_args_and_caller_meta() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let delegate = runtime
            .root()
            .fix("role:tax")
            .unwrap()
            .with_meta(json!({"timeout$": 5}))
            .unwrap();

        let msg = json!({"role": "other", "timeout$": 9}).into_message().unwrap();
        let composed = delegate.compose(msg);
        assert_eq!(composed["role"], json!("tax"));
        assert_eq!(composed["timeout$"], json!(9));
    }

    #[tokio::test]
    async fn test_prior_outside_action_fails() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let err = runtime.root().prior("a:1").await.unwrap_err();
        assert_eq!(err.code, "no_prior_context");
    }
}
