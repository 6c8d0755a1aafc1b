//! Action definitions and handler calling conventions
//!
//! Handlers can be declared in three styles: a synchronous function returning
//! its result, a callback-style function answering through a [`Reply`], or a
//! function returning a future. All three are normalized at registration time
//! into a single [`ActionFn`] shape, so the dispatcher only ever deals with
//! "message and delegate in, eventual result out".

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::delegate::Delegate;
use super::message::Message;
use super::pattern::Pattern;
use super::plugin::{PluginIdentity, ReadyGate};
use super::rules::Rules;

/// Future produced by a normalized handler
pub type ActionFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// The single internal handler contract
pub type ActionFn = Arc<dyn Fn(Message, Delegate) -> ActionFuture + Send + Sync>;

type SyncFn = Arc<dyn Fn(&Message, &Delegate) -> anyhow::Result<Value> + Send + Sync>;
type CallbackFn = Arc<dyn Fn(Message, Delegate, Reply) + Send + Sync>;

/// One-shot reply handle given to callback-style handlers.
///
/// Consuming `self` on send means a handler can answer at most once.
pub struct Reply {
    tx: oneshot::Sender<anyhow::Result<Value>>,
}

impl Reply {
    /// Deliver the outcome
    pub fn send(self, result: anyhow::Result<Value>) {
        // The receiver is gone once the caller timed out; the late reply is dropped
        let _ = self.tx.send(result);
    }

    /// Deliver a successful result
    pub fn ok(self, value: Value) {
        self.send(Ok(value));
    }

    /// Deliver a failure
    pub fn err(self, error: impl Into<anyhow::Error>) {
        self.send(Err(error.into()));
    }
}

/// A user handler in one of the supported calling conventions
#[derive(Clone)]
pub enum Action {
    /// Returns its result directly
    Sync(SyncFn),
    /// Answers through a [`Reply`], possibly later
    Callback(CallbackFn),
    /// Returns a future
    Async(ActionFn),
}

impl Action {
    /// Wrap a synchronous handler
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Message, &Delegate) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap a callback-style handler
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Message, Delegate, Reply) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    /// Wrap a future-returning handler
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Message, Delegate) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::Async(Arc::new(
            move |message: Message, delegate: Delegate| -> ActionFuture {
                Box::pin(f(message, delegate))
            },
        ))
    }

    /// Calling convention name, for logs
    pub fn style(&self) -> &'static str {
        match self {
            Self::Sync(_) => "sync",
            Self::Callback(_) => "callback",
            Self::Async(_) => "async",
        }
    }

    /// Adapt to the normalized handler shape
    pub fn normalize(self) -> ActionFn {
        match self {
            Self::Async(func) => func,
            Self::Sync(func) => Arc::new(move |message: Message, delegate: Delegate| -> ActionFuture {
                let outcome = func(&message, &delegate);
                Box::pin(futures::future::ready(outcome))
            }),
            Self::Callback(func) => Arc::new(move |message: Message, delegate: Delegate| -> ActionFuture {
                let (tx, rx) = oneshot::channel();
                func(message, delegate, Reply { tx });
                Box::pin(async move {
                    match rx.await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(anyhow::anyhow!("handler dropped its reply without answering")),
                    }
                })
            }),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self.style())
    }
}

/// A registered action: pattern, handler and metadata.
///
/// Immutable once published in the index. Re-registering the same canonical
/// pattern creates a fresh definition whose `prior` is the one it replaces.
pub struct ActionDefinition {
    pub(crate) id: String,
    pub(crate) seq: u64,
    pub(crate) pattern: Pattern,
    pub(crate) raw: Message,
    pub(crate) plugin: PluginIdentity,
    pub(crate) rules: Option<Rules>,
    pub(crate) callpoint: String,
    pub(crate) style: &'static str,
    pub(crate) func: ActionFn,
    pub(crate) prior: Option<Arc<ActionDefinition>>,
    pub(crate) gate: Option<ReadyGate>,
    pub(crate) registered_at: DateTime<Utc>,
}

impl ActionDefinition {
    /// Unique definition id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Global registration sequence number
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Parsed pattern
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Canonical pattern string
    pub fn canonical(&self) -> &str {
        self.pattern.canonical()
    }

    /// Pattern as originally supplied
    pub fn raw(&self) -> &Message {
        &self.raw
    }

    /// Plugin that registered the action
    pub fn plugin(&self) -> &PluginIdentity {
        &self.plugin
    }

    /// Validation rules, if declared
    pub fn rules(&self) -> Option<&Rules> {
        self.rules.as_ref()
    }

    /// Attach rules, merging with any declared at registration.
    ///
    /// Only meaningful for definitions not yet published, i.e. from a
    /// registration modifier.
    pub fn attach_rules(&mut self, rules: Rules) {
        self.rules = Some(match self.rules.take() {
            Some(existing) => existing.merge(rules),
            None => rules,
        });
    }

    /// Registration call site
    pub fn callpoint(&self) -> &str {
        &self.callpoint
    }

    /// Calling convention of the original handler
    pub fn style(&self) -> &'static str {
        self.style
    }

    /// When the definition was registered
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Definition this one overrides
    pub fn prior(&self) -> Option<&Arc<ActionDefinition>> {
        self.prior.as_ref()
    }

    /// Whether this definition shadows an earlier one
    pub fn is_override(&self) -> bool {
        self.prior.is_some()
    }

    /// Walk the override chain, newest first, excluding `self`
    pub fn priors(&self) -> impl Iterator<Item = &Arc<ActionDefinition>> {
        std::iter::successors(self.prior.as_ref(), |def| def.prior.as_ref())
    }

    /// Invoke the normalized handler
    pub(crate) fn call(&self, message: Message, delegate: Delegate) -> ActionFuture {
        (self.func)(message, delegate)
    }

    /// JSON description for tooling
    pub fn describe(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "pattern": self.pattern.canonical(),
            "raw": self.raw,
            "plugin": self.plugin.full_name,
            "callpoint": self.callpoint,
            "style": self.style,
            "rules": self.rules.as_ref().map(Rules::describe),
            "priors": self.priors().map(|def| def.id.clone()).collect::<Vec<_>>(),
            "registered_at": self.registered_at.to_rfc3339(),
        })
    }
}

impl fmt::Debug for ActionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDefinition")
            .field("id", &self.id)
            .field("pattern", &self.pattern.canonical())
            .field("plugin", &self.plugin.full_name)
            .field("prior", &self.prior.as_ref().map(|def| def.id.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeConfig};
    use serde_json::json;

    fn delegate() -> Delegate {
        Runtime::new(RuntimeConfig::default()).root()
    }

    #[tokio::test]
    async fn test_sync_style_normalized() {
        let func = Action::sync(|msg, _| Ok(json!({"echo": msg["x"]}))).normalize();
        let out = func(json!({"x": 1}).as_object().unwrap().clone(), delegate()).await.unwrap();
        assert_eq!(out, json!({"echo": 1}));
    }

    #[tokio::test]
    async fn test_callback_style_normalized() {
        let func = Action::callback(|msg, _, reply| {
            tokio::spawn(async move {
                reply.ok(json!({"late": msg["x"]}));
            });
        })
        .normalize();
        let out = func(json!({"x": 2}).as_object().unwrap().clone(), delegate()).await.unwrap();
        assert_eq!(out, json!({"late": 2}));
    }

    #[tokio::test]
    async fn test_dropped_reply_is_an_error() {
        let func = Action::callback(|_, _, reply| drop(reply)).normalize();
        let out = func(serde_json::Map::new(), delegate()).await;
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn test_async_style_normalized() {
        let func = Action::future(|msg, _| async move {
            tokio::task::yield_now().await;
            Ok(json!({"n": msg["n"]}))
        })
        .normalize();
        let out = func(json!({"n": 3}).as_object().unwrap().clone(), delegate()).await.unwrap();
        assert_eq!(out, json!({"n": 3}));
    }
}
