//! Runtime orchestrator and public API
//!
//! This module provides the main `Runtime` struct that owns the shared
//! services (pattern index, pipelines, stats, plugins) and exposes the public
//! interface for registering and dispatching actions.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

// Submodules
pub mod action;
pub mod delegate;
pub mod error;
pub mod history;
pub mod invocation;
pub mod message;
pub mod pattern;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod rules;
pub mod stats;
pub mod storage;
pub mod transport;
pub mod ward;

use action::{Action, ActionDefinition};
use delegate::Delegate;
use error::{ActError, ActResult, RegistrationResult, Result, RuntimeError};
use history::History;
use message::{IntoMessage, Message};
use pattern::{IntoPattern, Pattern};
use pipeline::{ActEvent, Modifier, Subscriber, Wards};
use plugin::{LoadedPlugin, Plugin, PluginIdentity};
use registry::{ListIter, PatternIndex};
use rules::{Rule, Rules};
use stats::{PatternStats, Stats, StatsReport};
use transport::Transport;

/// Capacity of the announce channel
const EVENT_CAPACITY: usize = 256;

/// Configuration for the courier runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Root directory for runtime storage (default: .courier/)
    pub root: PathBuf,

    /// Default per-invocation deadline in milliseconds
    pub timeout_ms: u64,

    /// Maximum nested act/prior depth
    pub max_depth: usize,

    /// Reject registrations ambiguous with an existing pattern
    pub strict_add: bool,

    /// Replay cache capacity; 0 disables replay
    pub cache_size: usize,

    /// Per-pattern stats accounting
    pub stats: bool,

    /// Log every act with its call chain
    pub trace: bool,

    /// Register the built-in `role:courier` actions
    pub builtins: bool,

    /// Enable debug tracing
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".courier"),
            timeout_ms: 22_000,
            max_depth: 33,
            strict_add: false,
            cache_size: 1111,
            stats: true,
            trace: false,
            builtins: true,
            debug: false,
        }
    }
}

/// Handler for failures of acts nobody is waiting on
pub type ErrorHandler = Arc<dyn Fn(&ActError) + Send + Sync>;

/// Services shared by every delegate of one runtime
pub(crate) struct Services {
    pub(crate) config: RuntimeConfig,
    pub(crate) index: PatternIndex,
    pub(crate) wards: Wards,
    pub(crate) stats: Stats,
    pub(crate) history: History,
    pub(crate) subscribers: RwLock<Arc<Vec<Subscriber>>>,
    pub(crate) modifiers: RwLock<Arc<Vec<Modifier>>>,
    pub(crate) events: broadcast::Sender<ActEvent>,
    pub(crate) plugins: tokio::sync::Mutex<Vec<LoadedPlugin>>,
    pub(crate) exports: RwLock<BTreeMap<String, Value>>,
    pub(crate) closed: AtomicBool,
    pub(crate) error_handler: RwLock<ErrorHandler>,
}

impl Services {
    fn new(config: RuntimeConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let history = History::new(config.cache_size);
        Self {
            config,
            index: PatternIndex::new(),
            wards: Wards::new(),
            stats: Stats::new(),
            history,
            subscribers: RwLock::new(Arc::new(Vec::new())),
            modifiers: RwLock::new(Arc::new(Vec::new())),
            events,
            plugins: tokio::sync::Mutex::new(Vec::new()),
            exports: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            error_handler: RwLock::new(Arc::new(|err: &ActError| {
                error!(kind = %err.kind, code = %err.code, pattern = ?err.pattern, "unhandled act error: {}", err.message);
            })),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pass an unobserved failure to the error handler
    pub(crate) fn report(&self, err: &ActError) {
        let handler = self.error_handler.read().clone();
        handler(err);
    }
}

/// The main runtime orchestrator
///
/// Owns the pattern index and pipelines; every [`Delegate`] derived from it
/// shares them.
pub struct Runtime {
    services: Arc<Services>,
    root: Delegate,
}

impl Runtime {
    /// Create a new runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> Self {
        let builtins = config.builtins;
        let services = Arc::new(Services::new(config));
        let root = Delegate::root(services.clone());
        let runtime = Self { services, root };
        if builtins {
            runtime.register_builtins();
        }
        runtime
    }

    /// Initialize runtime storage and persist the configuration
    pub fn init(config: RuntimeConfig) -> Result<Self> {
        storage::init_storage(&config.root)?;
        storage::write_config(&config)?;
        Ok(Self::new(config))
    }

    /// Load a runtime from a persisted configuration
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let mut config = storage::load_config(root.as_ref())?;
        config.root = root.as_ref().to_path_buf();
        Ok(Self::new(config))
    }

    /// Load the persisted configuration under `root`, or use defaults rooted there
    pub fn load_or_default(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if root.join(storage::CONFIG_FILE).exists() {
            return Self::load(root);
        }
        info!(root = ?root, "no stored config, using defaults");
        Ok(Self::new(RuntimeConfig {
            root: root.to_path_buf(),
            ..RuntimeConfig::default()
        }))
    }

    /// Get the current configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.services.config
    }

    /// Root delegate: no fixed arguments, `root` plugin identity
    pub fn root(&self) -> Delegate {
        self.root.clone()
    }

    /// The pattern index
    pub fn index(&self) -> &PatternIndex {
        &self.services.index
    }

    /// Register an action
    #[track_caller]
    pub fn add(&self, pattern: impl IntoMessage, action: Action) -> RegistrationResult<&Self> {
        self.root.add(pattern, action)?;
        Ok(self)
    }

    /// Register an action with validation rules
    #[track_caller]
    pub fn add_with_rules(
        &self,
        pattern: impl IntoMessage,
        rules: Rules,
        action: Action,
    ) -> RegistrationResult<&Self> {
        self.root.add_with_rules(pattern, rules, action)?;
        Ok(self)
    }

    /// Dispatch a message and await its result
    pub async fn act(&self, message: impl IntoMessage) -> ActResult<Value> {
        self.root.act(message).await
    }

    /// Dispatch a message, delivering the result to `callback` exactly once
    pub fn act_with<F>(&self, message: impl IntoMessage, callback: F)
    where
        F: FnOnce(ActResult<Value>) + Send + 'static,
    {
        self.root.act_with(message, callback)
    }

    /// Dispatch without waiting; failures go to the error handler
    pub fn act_detached(&self, message: impl IntoMessage) {
        self.root.act_detached(message)
    }

    /// Replace the handler receiving failures of detached acts
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&ActError) + Send + Sync + 'static,
    {
        *self.services.error_handler.write() = Arc::new(handler);
    }

    /// Live definition registered at exactly this pattern
    pub fn find(&self, pattern: impl IntoPattern) -> Option<Arc<ActionDefinition>> {
        self.root.find(pattern)
    }

    /// Whether a definition is registered at exactly this pattern
    pub fn has(&self, pattern: impl IntoPattern) -> bool {
        self.root.has(pattern)
    }

    /// Live definitions covering an optional partial query
    pub fn list(&self, query: Option<Pattern>) -> ListIter {
        self.root.list(query)
    }

    /// Override every live definition covering `query` with `action`.
    ///
    /// The wrapper reaches each wrapped definition through `prior`.
    #[track_caller]
    pub fn wrap(&self, query: impl IntoPattern, action: Action) -> RegistrationResult<&Self> {
        let query = query.into_pattern()?;
        let targets: Vec<Arc<ActionDefinition>> = self.list(Some(query.clone())).collect();
        for target in &targets {
            self.root.add(target.pattern(), action.clone())?;
        }
        debug!(query = %query, wrapped = targets.len(), "wrapped actions");
        Ok(self)
    }

    /// Register a passive listener for acts matching `pattern`
    pub fn sub<F>(&self, pattern: impl IntoPattern, listener: F) -> RegistrationResult<&Self>
    where
        F: Fn(&Message, std::result::Result<&Value, &ActError>) + Send + Sync + 'static,
    {
        let pattern = pattern.into_pattern()?;
        let mut subscribers = self.services.subscribers.write();
        let mut next = Vec::clone(&subscribers);
        next.push(Subscriber {
            pattern,
            listener: Arc::new(listener),
        });
        *subscribers = Arc::new(next);
        Ok(self)
    }

    /// Receiver of announce events
    pub fn events(&self) -> broadcast::Receiver<ActEvent> {
        self.services.events.subscribe()
    }

    /// Stats for every pattern
    pub fn stats(&self) -> StatsReport {
        self.services.stats.report()
    }

    /// Stats for one pattern
    pub fn stats_for(&self, pattern: impl IntoPattern) -> Option<PatternStats> {
        let pattern = pattern.into_pattern().ok()?;
        self.services.stats.get(pattern.canonical())
    }

    /// Register a hook that post-processes definitions during registration
    pub fn modify<F>(&self, hook: F) -> &Self
    where
        F: Fn(&mut ActionDefinition) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let mut modifiers = self.services.modifiers.write();
        let mut next = Vec::clone(&modifiers);
        next.push(Arc::new(hook));
        *modifiers = Arc::new(next);
        self
    }

    /// Load a plugin: run `define`, record exports, await `init`.
    ///
    /// Acts from outside the plugin to its patterns wait until `init`
    /// completes. Loading the same plugin name and tag twice is a no-op.
    pub async fn use_plugin<P>(&self, plugin: P, options: Value) -> Result<()>
    where
        P: Plugin + 'static,
    {
        if self.services.is_closed() {
            return Err(RuntimeError::Closed);
        }
        let plugin: Arc<dyn Plugin> = Arc::new(plugin);
        let identity = PluginIdentity::new(plugin.name(), plugin.tag().map(str::to_string));
        let failed = |phase: &'static str, source: anyhow::Error| RuntimeError::Plugin {
            name: identity.full_name.clone(),
            phase,
            source,
        };

        {
            let plugins = self.services.plugins.lock().await;
            if plugins.iter().any(|loaded| loaded.identity == identity) {
                debug!(plugin = %identity, "plugin already loaded");
                return Ok(());
            }
        }

        let (opener, gate) = plugin::gate();
        let delegate = self.root.for_plugin(identity.clone(), Some(gate));

        plugin
            .define(&delegate, &options)
            .map_err(|source| failed("define", source))?;

        let exports = plugin.exports(&options);
        if let Some(exports) = &exports {
            let mut published = self.services.exports.write();
            published.insert(identity.full_name.clone(), exports.clone());
            published
                .entry(identity.name.clone())
                .or_insert_with(|| exports.clone());
        }

        plugin
            .init(&delegate)
            .await
            .map_err(|source| failed("init", source))?;
        opener.open();

        self.services.plugins.lock().await.push(LoadedPlugin {
            identity: identity.clone(),
            plugin,
            delegate,
            ready_called: false,
        });
        info!(plugin = %identity, "plugin loaded");
        Ok(())
    }

    /// Run the `ready` hook of every plugin that has not seen it yet
    pub async fn ready(&self) -> Result<()> {
        let mut plugins = self.services.plugins.lock().await;
        for loaded in plugins.iter_mut().filter(|loaded| !loaded.ready_called) {
            loaded.ready_called = true;
            loaded
                .plugin
                .ready(&loaded.delegate)
                .await
                .map_err(|source| RuntimeError::Plugin {
                    name: loaded.identity.full_name.clone(),
                    phase: "ready",
                    source,
                })?;
            debug!(plugin = %loaded.identity, "plugin ready");
        }
        Ok(())
    }

    /// Run `close` hooks in reverse load order, then refuse further work.
    ///
    /// Every hook runs even if an earlier one fails; the first failure is returned.
    pub async fn close(&self) -> Result<()> {
        let plugins = self.services.plugins.lock().await;
        if self.services.is_closed() {
            return Ok(());
        }

        let mut first_failure = None;
        for loaded in plugins.iter().rev() {
            if let Err(source) = loaded.plugin.close(&loaded.delegate).await {
                warn!(plugin = %loaded.identity, error = %source, "plugin close failed");
                first_failure.get_or_insert(RuntimeError::Plugin {
                    name: loaded.identity.full_name.clone(),
                    phase: "close",
                    source,
                });
            }
        }

        self.services.closed.store(true, Ordering::SeqCst);
        info!(plugins = plugins.len(), "runtime closed");
        first_failure.map_or(Ok(()), Err)
    }

    /// Whether `close` has completed
    pub fn is_closed(&self) -> bool {
        self.services.is_closed()
    }

    /// Exports of a loaded plugin, by name or `name$tag`
    pub fn export(&self, name: &str) -> Option<Value> {
        self.services.exports.read().get(name).cloned()
    }

    /// Register proxy handlers forwarding `patterns` through `transport`
    #[track_caller]
    pub fn client<T, I, P>(&self, patterns: I, transport: T) -> RegistrationResult<&Self>
    where
        T: Transport + 'static,
        I: IntoIterator<Item = P>,
        P: IntoMessage,
    {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let identity = PluginIdentity::new("client", Some(transport.name().to_string()));
        let delegate = self.root.for_plugin(identity, None);
        let location = Location::caller();
        for pattern in patterns {
            delegate.add(pattern, transport::proxy(transport.clone()))?;
        }
        debug!(transport = transport.name(), %location, "client registered");
        Ok(self)
    }

    fn register_builtins(&self) {
        let registered = self
            .add(
                "role:courier,cmd:ping",
                Action::sync(|_, _| {
                    Ok(json!({
                        "pong": true,
                        "version": crate::VERSION,
                        "now": Utc::now().to_rfc3339(),
                    }))
                }),
            )
            .and_then(|rt| {
                rt.add(
                    "role:courier,cmd:stats",
                    Action::sync(|msg, delegate| {
                        let report = delegate.stats();
                        let value = match msg.get("pattern") {
                            Some(pattern) => {
                                let pattern = pattern_of(pattern)?;
                                json!({
                                    "pattern": pattern.canonical(),
                                    "stats": report.patterns.get(pattern.canonical()),
                                })
                            }
                            None => serde_json::to_value(report)?,
                        };
                        Ok(value)
                    }),
                )
            })
            .and_then(|rt| {
                rt.add(
                    "role:courier,cmd:list",
                    Action::sync(|msg, delegate| {
                        let query = msg.get("query").map(pattern_of).transpose()?;
                        let patterns: Vec<String> = delegate
                            .list(query)
                            .map(|def| def.canonical().to_string())
                            .collect();
                        Ok(json!({ "count": patterns.len(), "patterns": patterns }))
                    }),
                )
            })
            .and_then(|rt| {
                rt.add_with_rules(
                    "role:courier,cmd:find",
                    Rules::new().rule("pattern", Rule::Required),
                    Action::sync(|msg, delegate| {
                        let pattern = msg
                            .get("pattern")
                            .map(pattern_of)
                            .transpose()?
                            .ok_or_else(|| anyhow::anyhow!("pattern is required"))?;
                        let found = delegate.find(&pattern);
                        Ok(json!({
                            "found": found.is_some(),
                            "action": found.map(|def| def.describe()),
                        }))
                    }),
                )
            });

        if let Err(err) = registered {
            warn!(error = %err, "failed to register built-in actions");
        }
    }
}

/// Read a pattern given either in compact string form or as an object
fn pattern_of(value: &Value) -> std::result::Result<Pattern, ActError> {
    let parsed = match value {
        Value::String(text) => Pattern::parse(text),
        other => other.clone().into_pattern(),
    };
    parsed.map_err(|err| ActError::validation(format!("Invalid pattern: {}", err)))
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.services.config)
            .field("actions", &self.services.index.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// Re-export commonly used types
pub use action::Reply;
pub use error::{ActErrorKind, RegistrationError};
pub use invocation::{ActionId, TraceId};
pub use plugin::FnPlugin;
pub use transport::LocalTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let runtime = Runtime::new(RuntimeConfig::default());
        assert!(runtime.has("role:courier,cmd:ping"));
        assert_eq!(runtime.list(Some(Pattern::parse("role:courier").unwrap())).count(), 4);

        let bare = Runtime::new(RuntimeConfig {
            builtins: false,
            ..RuntimeConfig::default()
        });
        assert!(bare.index().is_empty());
    }

    #[tokio::test]
    async fn test_builtin_ping_and_find() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let pong = runtime.act("role:courier,cmd:ping").await.unwrap();
        assert_eq!(pong["pong"], json!(true));

        let found = runtime
            .act(json!({"role": "courier", "cmd": "find", "pattern": "cmd:ping,role:courier"}))
            .await
            .unwrap();
        assert_eq!(found["found"], json!(true));

        let err = runtime.act("role:courier,cmd:find").await.unwrap_err();
        assert_eq!(err.kind, ActErrorKind::Validation);
    }

    #[test]
    fn test_init_and_load() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = RuntimeConfig {
            root: temp.path().join(".courier"),
            timeout_ms: 75,
            ..RuntimeConfig::default()
        };
        Runtime::init(config.clone()).unwrap();

        let loaded = Runtime::load(&config.root).unwrap();
        assert_eq!(loaded.config(), &config);
        let reloaded = Runtime::load_or_default(&config.root).unwrap();
        assert_eq!(reloaded.config().timeout_ms, 75);
    }

    #[test]
    fn test_load_or_default_keeps_root() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("fresh");

        let runtime = Runtime::load_or_default(&root).unwrap();
        assert_eq!(runtime.config().root, root);
        assert_eq!(runtime.config().timeout_ms, RuntimeConfig::default().timeout_ms);
    }
}
