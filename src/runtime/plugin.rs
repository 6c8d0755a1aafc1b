//! Plugin collaborator interface and lifecycle
//!
//! A plugin is a named bundle of actions. The runtime gives each plugin a
//! delegate scoped to its identity; the plugin's `define` makes its `add`
//! calls against that delegate. Lifecycle hooks run in order: `define`,
//! `init` (awaited before the plugin's actions accept outside traffic),
//! `ready` and finally `close`.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use super::delegate::Delegate;

/// Identity of the plugin that registered an action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginIdentity {
    /// Plugin name
    pub name: String,
    /// Optional instance tag
    pub tag: Option<String>,
    /// `name` or `name$tag`
    pub full_name: String,
}

impl PluginIdentity {
    /// Create an identity
    pub fn new(name: impl Into<String>, tag: Option<String>) -> Self {
        let name = name.into();
        let full_name = match &tag {
            Some(tag) => format!("{}${}", name, tag),
            None => name.clone(),
        };
        Self {
            name,
            tag,
            full_name,
        }
    }

    /// Identity used for actions added outside any plugin
    pub fn root() -> Self {
        Self::new("root", None)
    }
}

impl fmt::Display for PluginIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Readiness gate shared by the actions of a plugin still initializing
#[derive(Debug, Clone)]
pub struct ReadyGate {
    rx: watch::Receiver<bool>,
}

impl ReadyGate {
    /// Check without waiting
    pub fn is_open(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the gate opens.
    ///
    /// A gate whose opener was dropped counts as open so callers never hang
    /// on a plugin that failed to initialize.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Opening side of a [`ReadyGate`]
#[derive(Debug)]
pub(crate) struct GateOpener {
    tx: watch::Sender<bool>,
}

impl GateOpener {
    pub(crate) fn open(&self) {
        self.tx.send_replace(true);
    }
}

pub(crate) fn gate() -> (GateOpener, ReadyGate) {
    let (tx, rx) = watch::channel(false);
    (GateOpener { tx }, ReadyGate { rx })
}

/// A loadable plugin.
///
/// Only `name` and `define` are required; the lifecycle hooks default to no-ops.
pub trait Plugin: Send + Sync {
    /// Plugin name
    fn name(&self) -> &str;

    /// Optional instance tag, allowing one plugin to be loaded several times
    fn tag(&self) -> Option<&str> {
        None
    }

    /// Register actions against the plugin-scoped delegate
    fn define(&self, delegate: &Delegate, options: &Value) -> anyhow::Result<()>;

    /// Values the plugin exposes to other code (see `Runtime::export`)
    fn exports(&self, _options: &Value) -> Option<Value> {
        None
    }

    /// Asynchronous initialization, awaited before outside traffic reaches the plugin
    fn init<'a>(&'a self, _delegate: &'a Delegate) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Called once all plugins loaded so far are initialized
    fn ready<'a>(&'a self, _delegate: &'a Delegate) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Called on shutdown, in reverse load order
    fn close<'a>(&'a self, _delegate: &'a Delegate) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// A loaded plugin with its delegate
pub(crate) struct LoadedPlugin {
    pub(crate) identity: PluginIdentity,
    pub(crate) plugin: Arc<dyn Plugin>,
    pub(crate) delegate: Delegate,
    pub(crate) ready_called: bool,
}

/// Plugin assembled from closures, handy for small plugins and tests
pub struct FnPlugin {
    name: String,
    define: Box<dyn Fn(&Delegate, &Value) -> anyhow::Result<()> + Send + Sync>,
}

impl FnPlugin {
    /// Create a plugin whose `define` is the given closure
    pub fn new<F>(name: impl Into<String>, define: F) -> Self
    where
        F: Fn(&Delegate, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            define: Box::new(define),
        }
    }
}

impl Plugin for FnPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn define(&self, delegate: &Delegate, options: &Value) -> anyhow::Result<()> {
        (self.define)(delegate, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_full_name() {
        assert_eq!(PluginIdentity::new("tax", None).full_name, "tax");
        assert_eq!(
            PluginIdentity::new("tax", Some("eu".to_string())).full_name,
            "tax$eu"
        );
    }

    #[tokio::test]
    async fn test_gate_opens() {
        let (opener, gate) = gate();
        assert!(!gate.is_open());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        opener.open();
        waiter.await.unwrap();
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn test_dropped_opener_releases_waiters() {
        let (opener, gate) = gate();
        drop(opener);
        gate.wait().await;
    }
}
