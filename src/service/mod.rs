//! NDJSON service for remote dispatch.
//!
//! This module exposes a small dispatcher that translates newline-delimited
//! JSON commands into calls on a runtime [`Delegate`]. Commands other than
//! `act` are answered in arrival order; each `act` runs in its own task and its
//! response is written as soon as it completes, so replies may be reordered and
//! are matched to requests by `id`.

pub mod client;

use crate::PROTOCOL_VERSION;
use crate::runtime::delegate::Delegate;
use crate::runtime::error::ActError;
use crate::runtime::message::{IntoMessage, Message};
use crate::runtime::pattern::{IntoPattern, Pattern};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use client::{ClientError, NdjsonTransport};

/// Service entry point: serves a delegate over NDJSON connections.
#[derive(Debug, Clone)]
pub struct Service {
    delegate: Delegate,
}

impl Service {
    /// Create a new service dispatching through the provided delegate.
    pub fn new(delegate: Delegate) -> Self {
        Self { delegate }
    }

    /// Process a single connection by consuming requests from the reader and writing responses.
    ///
    /// Returns once the reader is exhausted and every in-flight act has been answered.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<ResponseEnvelope>();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(envelope) = rx.recv().await {
                let mut line = serde_json::to_vec(&envelope)?;
                line.push(b'\n');
                writer.write_all(&line).await?;
                writer.flush().await?;
            }
            Ok::<(), io::Error>(())
        });

        let mut session = Session {
            delegate: self.delegate.clone(),
            tx,
            handshake_completed: false,
        };
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            session.handle_line(&line);
        }

        // In-flight acts hold their own senders; the writer drains until the last one replies
        drop(session);
        writer_task.await.map_err(io::Error::other)?
    }

    /// Bind a TCP listener and serve every accepted connection.
    pub async fn listen(self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "courier service listening");
        self.serve(listener).await
    }

    /// Serve connections accepted from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "connection accepted");
            let service = self.clone();
            tokio::spawn(async move {
                let (read, write) = stream.into_split();
                if let Err(err) = service.run(BufReader::new(read), write).await {
                    warn!(%peer, error = %err, "connection failed");
                }
                debug!(%peer, "connection closed");
            });
        }
    }
}

struct Session {
    delegate: Delegate,
    tx: mpsc::UnboundedSender<ResponseEnvelope>,
    handshake_completed: bool,
}

impl Session {
    fn handle_line(&mut self, line: &str) {
        let envelope: Result<RequestEnvelope, _> = serde_json::from_str(line);
        match envelope {
            Ok(request) => {
                if let Some(response) = self.handle_request(request) {
                    self.write_response(response);
                }
            }
            Err(err) => {
                let response =
                    ResponseEnvelope::from_error(Value::Null, ServiceError::Parse(err.to_string()));
                self.write_response(response);
            }
        }
    }

    fn write_response(&self, envelope: ResponseEnvelope) {
        // Only fails once the writer task is gone, i.e. the connection is closing
        let _ = self.tx.send(envelope);
    }

    /// Answer a request, or return `None` when the answer is sent later
    fn handle_request(&mut self, request: RequestEnvelope) -> Option<ResponseEnvelope> {
        let result = match request.command.as_str() {
            "handshake" => self.cmd_handshake(&request.params),
            "act" => match self.cmd_act(request.id.clone(), &request.params) {
                Ok(()) => return None,
                Err(err) => Err(err),
            },
            "list" => self.cmd_list(&request.params),
            "find" => self.cmd_find(&request.params),
            "ping" => self.cmd_ping(),
            other => Err(ServiceError::Unsupported(other.to_string())),
        };

        Some(match result {
            Ok(value) => ResponseEnvelope::success(request.id, value),
            Err(err) => ResponseEnvelope::from_error(request.id, err),
        })
    }

    fn cmd_handshake(&mut self, params: &Value) -> Result<Value, ServiceError> {
        let client = params
            .get("client")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::invalid_param("client"))?;

        let requested = params
            .get("protocol_version")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::invalid_param("protocol_version"))?;

        if requested != PROTOCOL_VERSION {
            return Err(ServiceError::Protocol(format!(
                "unsupported protocol version: expected {}, got {}",
                PROTOCOL_VERSION, requested
            )));
        }

        self.handshake_completed = true;
        debug!(client, "handshake completed");

        Ok(json!({
            "protocol_version": PROTOCOL_VERSION,
            "runtime": {
                "version": crate::VERSION,
                "client": client,
                "features": ["act", "list", "find", "ping"]
            }
        }))
    }

    fn ensure_handshake(&self) -> Result<(), ServiceError> {
        if self.handshake_completed {
            Ok(())
        } else {
            Err(ServiceError::Protocol(
                "handshake required before issuing commands".into(),
            ))
        }
    }

    fn cmd_act(&mut self, id: Value, params: &Value) -> Result<(), ServiceError> {
        self.ensure_handshake()?;
        let message = message_param(params, "message")?;

        let delegate = self.delegate.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let response = match delegate.act(message).await {
                Ok(value) => ResponseEnvelope::success(id, value),
                Err(err) => ResponseEnvelope::from_error(id, ServiceError::Act(err)),
            };
            let _ = tx.send(response);
        });
        Ok(())
    }

    fn cmd_list(&mut self, params: &Value) -> Result<Value, ServiceError> {
        self.ensure_handshake()?;
        let query = match params.get("query") {
            None | Some(Value::Null) => None,
            Some(value) => Some(pattern_param(value, "query")?),
        };
        let actions: Vec<Value> = self
            .delegate
            .list(query)
            .map(|def| {
                json!({
                    "pattern": def.canonical(),
                    "plugin": def.plugin().full_name,
                    "id": def.id(),
                })
            })
            .collect();
        Ok(json!({ "count": actions.len(), "actions": actions }))
    }

    fn cmd_find(&mut self, params: &Value) -> Result<Value, ServiceError> {
        self.ensure_handshake()?;
        let value = params
            .get("pattern")
            .ok_or_else(|| ServiceError::invalid_param("pattern"))?;
        let pattern = pattern_param(value, "pattern")?;
        let action = self.delegate.find(&pattern).map(|def| def.describe());
        Ok(json!({ "found": action.is_some(), "action": action }))
    }

    fn cmd_ping(&mut self) -> Result<Value, ServiceError> {
        self.ensure_handshake()?;
        Ok(json!({ "pong": true, "version": crate::VERSION }))
    }
}

fn message_param(params: &Value, name: &str) -> Result<Message, ServiceError> {
    let value = params
        .get(name)
        .ok_or_else(|| ServiceError::invalid_param(name))?;
    let parsed = match value {
        Value::String(text) => text.as_str().into_message(),
        other => other.clone().into_message(),
    };
    parsed.map_err(|err| ServiceError::InvalidParams(format!("{}: {}", name, err)))
}

fn pattern_param(value: &Value, name: &str) -> Result<Pattern, ServiceError> {
    let parsed = match value {
        Value::String(text) => Pattern::parse(text),
        other => other.clone().into_pattern(),
    };
    parsed.map_err(|err| ServiceError::InvalidParams(format!("{}: {}", name, err)))
}

#[derive(Debug)]
enum ServiceError {
    Parse(String),
    InvalidParams(String),
    Unsupported(String),
    Protocol(String),
    Act(ActError),
}

impl ServiceError {
    fn invalid_param(name: &str) -> Self {
        ServiceError::InvalidParams(format!("missing or invalid parameter: {}", name))
    }
}

#[derive(Deserialize)]
struct RequestEnvelope {
    id: Value,
    command: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct ResponseEnvelope {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl ResponseEnvelope {
    fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn from_error(id: Value, error: ServiceError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error_value(error)),
        }
    }
}

/// Wire form of an error.
///
/// Dispatch errors keep the full [`ActError`] shape so clients can rebuild
/// them; protocol-level errors carry only a code and a message.
fn error_value(error: ServiceError) -> Value {
    let (code, message) = match error {
        ServiceError::Act(err) => {
            return serde_json::to_value(&err)
                .unwrap_or_else(|_| json!({ "code": err.code, "message": err.message }));
        }
        ServiceError::Parse(message) => ("parse_error", message),
        ServiceError::InvalidParams(message) => ("invalid_params", message),
        ServiceError::Unsupported(command) => (
            "unsupported_command",
            format!("Command '{command}' is not supported"),
        ),
        ServiceError::Protocol(message) => ("protocol_error", message),
    };
    json!({ "code": code, "message": message })
}
