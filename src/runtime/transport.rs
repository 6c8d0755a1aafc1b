//! Transport collaborator interface
//!
//! A transport forwards a message to some other dispatcher and relays its
//! structured result back. The index never sees a transport directly: the
//! runtime registers a proxy handler at each client pattern, so a remote action
//! looks exactly like a local one.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use super::action::Action;
use super::delegate::Delegate;
use super::error::ActResult;
use super::message::Message;

/// Forwards messages to a remote dispatcher
pub trait Transport: Send + Sync {
    /// Short name used for the proxy plugin identity
    fn name(&self) -> &str;

    /// Send one message and await its result.
    ///
    /// Remote dispatch errors are returned as they were reported; failures of
    /// the transport itself are `transport` errors.
    fn send(&self, message: Message) -> BoxFuture<'_, ActResult<Value>>;
}

/// Handler that forwards every matched message through a transport
pub(crate) fn proxy(transport: Arc<dyn Transport>) -> Action {
    Action::future(move |message, _delegate| {
        let transport = transport.clone();
        async move { transport.send(message).await.map_err(anyhow::Error::new) }
    })
}

/// In-process transport dispatching through another runtime's delegate
#[derive(Debug, Clone)]
pub struct LocalTransport {
    target: Delegate,
}

impl LocalTransport {
    /// Forward to `target`
    pub fn new(target: Delegate) -> Self {
        Self { target }
    }
}

impl Transport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    fn send(&self, message: Message) -> BoxFuture<'_, ActResult<Value>> {
        Box::pin(self.target.act(message))
    }
}
