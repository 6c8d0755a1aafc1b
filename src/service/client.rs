//! NDJSON client transport.
//!
//! Speaks the same newline-delimited JSON protocol as [`super::Service`].
//! Requests are multiplexed over one connection: each carries a numeric id and
//! a background task routes replies back to the waiting caller.

use crate::PROTOCOL_VERSION;
use crate::runtime::error::{ActError, ActResult};
use crate::runtime::message::Message;
use crate::runtime::transport::Transport;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Errors produced by the [`NdjsonTransport`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error while communicating with the service.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// JSON (de)serialisation error for envelopes.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The remote dispatcher reported a structured act error.
    #[error("remote act failed: {0}")]
    Remote(ActError),
    /// The service rejected the request at the protocol level.
    #[error("protocol error ({code}): {message}")]
    Protocol {
        /// Service-defined error code.
        code: String,
        /// Human-readable error message.
        message: String,
    },
    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

impl ClientError {
    fn from_remote(error: Value) -> Self {
        if error.get("kind").is_some() {
            if let Ok(act_error) = serde_json::from_value::<ActError>(error.clone()) {
                return ClientError::Remote(act_error);
            }
        }
        let field = |name: &str| {
            error
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        ClientError::Protocol {
            code: field("code"),
            message: field("message"),
        }
    }

    /// Convert into the error an `act` caller sees.
    ///
    /// Remote act errors pass through unchanged; every other failure is a
    /// `transport` error.
    pub fn into_act_error(self) -> ActError {
        match self {
            ClientError::Remote(err) => err,
            ClientError::Protocol { code, message } => {
                ActError::transport(format!("{}: {}", code, message))
                    .with_details(json!({ "remote_code": code }))
            }
            other => ActError::transport(other.to_string()),
        }
    }
}

/// Response returned by the `handshake` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Protocol version agreed between client and service.
    pub protocol_version: String,
    /// Runtime version reported by the service.
    pub runtime_version: String,
    /// List of feature flags exposed by the service.
    pub features: Vec<String>,
}

type Pending = HashMap<u64, oneshot::Sender<Result<Value, Value>>>;

struct Inner {
    name: String,
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

#[derive(Deserialize)]
struct Incoming {
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Inner {
    fn deliver(&self, line: &str) {
        let incoming: Incoming = match serde_json::from_str(line) {
            Ok(incoming) => incoming,
            Err(err) => {
                warn!(error = %err, "malformed response line");
                return;
            }
        };
        let Some(id) = incoming.id.as_u64() else {
            warn!(id = %incoming.id, "response without a request id");
            return;
        };
        let Some(waiter) = self.pending.lock().remove(&id) else {
            debug!(id, "response for unknown request");
            return;
        };
        let outcome = match incoming.error {
            Some(error) => Err(error),
            None => Ok(incoming.result.unwrap_or(Value::Null)),
        };
        let _ = waiter.send(outcome);
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with `Closed`
        self.pending.lock().clear();
    }
}

/// Client transport over any NDJSON byte stream.
#[derive(Clone)]
pub struct NdjsonTransport {
    inner: Arc<Inner>,
    handshake: HandshakeInfo,
}

impl NdjsonTransport {
    /// Connect to a service over TCP and perform the handshake.
    pub async fn connect(addr: impl ToSocketAddrs, client: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();
        Self::start(read, write, client).await
    }

    /// Start the reply router over an existing stream and perform the handshake.
    pub async fn start<R, W>(reader: R, writer: W, client: &str) -> Result<Self, ClientError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let inner = Arc::new(Inner {
            name: "ndjson".to_string(),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let router = inner.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => router.deliver(&line),
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "transport read failed");
                        break;
                    }
                }
            }
            router.shutdown();
        });

        let reply = request(
            &inner,
            "handshake",
            json!({ "client": client, "protocol_version": PROTOCOL_VERSION }),
        )
        .await?;
        let text = |value: &Value| value.as_str().unwrap_or_default().to_string();
        let handshake = HandshakeInfo {
            protocol_version: text(&reply["protocol_version"]),
            runtime_version: text(&reply["runtime"]["version"]),
            features: reply["runtime"]["features"]
                .as_array()
                .map(|features| features.iter().map(text).collect())
                .unwrap_or_default(),
        };
        debug!(version = %handshake.runtime_version, "handshake completed");

        Ok(Self { inner, handshake })
    }

    /// Handshake details reported by the service.
    pub fn handshake(&self) -> &HandshakeInfo {
        &self.handshake
    }

    /// Send a raw command and await its result.
    pub async fn request(&self, command: &str, params: Value) -> Result<Value, ClientError> {
        request(&self.inner, command, params).await
    }

    /// Remote `act`.
    pub async fn act(&self, message: Message) -> Result<Value, ClientError> {
        self.request("act", json!({ "message": message })).await
    }

    /// Live remote patterns, optionally restricted to a partial query.
    pub async fn list(&self, query: Option<&str>) -> Result<Vec<String>, ClientError> {
        let params = match query {
            Some(query) => json!({ "query": query }),
            None => json!({}),
        };
        let reply = self.request("list", params).await?;
        Ok(reply["actions"]
            .as_array()
            .map(|actions| {
                actions
                    .iter()
                    .filter_map(|action| action["pattern"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

async fn request(inner: &Inner, command: &str, params: Value) -> Result<Value, ClientError> {
    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = oneshot::channel();
    inner.pending.lock().insert(id, tx);
    // The router sets `closed` before draining, so a request registered after
    // the drain is caught here
    if inner.closed.load(Ordering::SeqCst) {
        inner.pending.lock().remove(&id);
        return Err(ClientError::Closed);
    }

    let mut line = serde_json::to_vec(&json!({ "id": id, "command": command, "params": params }))?;
    line.push(b'\n');
    {
        let mut writer = inner.writer.lock().await;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            inner.pending.lock().remove(&id);
            return Err(err.into());
        }
    }

    match rx.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(ClientError::from_remote(error)),
        Err(_) => Err(ClientError::Closed),
    }
}

impl Transport for NdjsonTransport {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn send(&self, message: Message) -> BoxFuture<'_, ActResult<Value>> {
        Box::pin(async move { self.act(message).await.map_err(ClientError::into_act_error) })
    }
}

impl std::fmt::Debug for NdjsonTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonTransport")
            .field("handshake", &self.handshake)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::error::ActErrorKind;

    #[test]
    fn test_remote_act_error_passes_through() {
        let wire = serde_json::to_value(ActError::validation("bad").with_code("invalid_msg")).unwrap();
        let err = ClientError::from_remote(wire).into_act_error();
        assert_eq!(err.kind, ActErrorKind::Validation);
        assert_eq!(err.code, "invalid_msg");
    }

    #[test]
    fn test_protocol_error_becomes_transport() {
        let wire = json!({"code": "protocol_error", "message": "handshake required"});
        let err = ClientError::from_remote(wire).into_act_error();
        assert_eq!(err.kind, ActErrorKind::Transport);
        assert_eq!(err.details["remote_code"], "protocol_error");
    }
}
