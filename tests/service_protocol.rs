use courier::service::{ClientError, NdjsonTransport, Service};
use courier::{Action, ActErrorKind, LocalTransport, Runtime, RuntimeConfig};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

fn remote_runtime() -> Runtime {
    let rt = Runtime::new(RuntimeConfig::default());
    rt.add(
        "role:math,cmd:sum",
        Action::sync(|msg, _| {
            let a = msg.get("a").and_then(Value::as_i64).unwrap_or_default();
            let b = msg.get("b").and_then(Value::as_i64).unwrap_or_default();
            Ok(json!({ "sum": a + b }))
        }),
    )
    .unwrap();
    rt.add(
        "role:math,cmd:fail",
        Action::sync(|_, _| anyhow::bail!("division by zero")),
    )
    .unwrap();
    rt
}

/// Serve `runtime` over an in-memory pipe and return the client end
fn serve(runtime: &Runtime) -> DuplexStream {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let service = Service::new(runtime.root());
    tokio::spawn(async move {
        let (read, write) = tokio::io::split(server);
        service.run(BufReader::new(read), write).await
    });
    client
}

async fn connect(runtime: &Runtime) -> NdjsonTransport {
    let (read, write) = tokio::io::split(serve(runtime));
    NdjsonTransport::start(read, write, "test-client").await.unwrap()
}

struct RawSession {
    lines: Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
    writer: tokio::io::WriteHalf<DuplexStream>,
}

impl RawSession {
    fn new(stream: DuplexStream) -> Self {
        let (read, writer) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn request(&mut self, request: Value) -> Value {
        self.send_line(&request.to_string()).await;
        let line = self.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

#[tokio::test]
async fn service_requires_handshake_and_reports_protocol_errors() {
    let rt = remote_runtime();
    let mut session = RawSession::new(serve(&rt));

    let early = session
        .request(json!({"id": 1, "command": "ping", "params": {}}))
        .await;
    assert_eq!(early["id"], json!(1));
    assert_eq!(early["error"]["code"], json!("protocol_error"));

    let bad_version = session
        .request(json!({"id": 2, "command": "handshake", "params": {
            "client": "raw", "protocol_version": "0.0.1"
        }}))
        .await;
    assert_eq!(bad_version["error"]["code"], json!("protocol_error"));

    let hello = session
        .request(json!({"id": 3, "command": "handshake", "params": {
            "client": "raw", "protocol_version": courier::PROTOCOL_VERSION
        }}))
        .await;
    assert_eq!(hello["result"]["protocol_version"], json!(courier::PROTOCOL_VERSION));
    assert_eq!(hello["result"]["runtime"]["version"], json!(courier::VERSION));

    let pong = session
        .request(json!({"id": 4, "command": "ping", "params": {}}))
        .await;
    assert_eq!(pong["result"]["pong"], json!(true));

    let unknown = session
        .request(json!({"id": 5, "command": "noop", "params": {}}))
        .await;
    assert_eq!(unknown["error"]["code"], json!("unsupported_command"));

    session.send_line("this is not json").await;
    let line = session.lines.next_line().await.unwrap().unwrap();
    let garbage: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(garbage["id"], Value::Null);
    assert_eq!(garbage["error"]["code"], json!("parse_error"));

    let missing = session
        .request(json!({"id": 6, "command": "act", "params": {}}))
        .await;
    assert_eq!(missing["error"]["code"], json!("invalid_params"));
}

#[tokio::test]
async fn service_dispatches_acts_and_lists_patterns() {
    let rt = remote_runtime();
    let mut session = RawSession::new(serve(&rt));
    session
        .request(json!({"id": "h", "command": "handshake", "params": {
            "client": "raw", "protocol_version": courier::PROTOCOL_VERSION
        }}))
        .await;

    let sum = session
        .request(json!({"id": 1, "command": "act", "params": {
            "message": {"role": "math", "cmd": "sum", "a": 2, "b": 3}
        }}))
        .await;
    assert_eq!(sum["result"], json!({"sum": 5}));

    // Compact string messages are accepted too
    let compact = session
        .request(json!({"id": 2, "command": "act", "params": {"message": "role:math,cmd:sum,a:1"}}))
        .await;
    assert_eq!(compact["result"], json!({"sum": 1}));

    let missing = session
        .request(json!({"id": 3, "command": "act", "params": {"message": {"role": "nope"}}}))
        .await;
    assert_eq!(missing["error"]["kind"], json!("not_found"));
    assert_eq!(missing["error"]["code"], json!("act_not_found"));

    let listed = session
        .request(json!({"id": 4, "command": "list", "params": {"query": "role:math"}}))
        .await;
    assert_eq!(listed["result"]["count"], json!(2));

    let found = session
        .request(json!({"id": 5, "command": "find", "params": {"pattern": {"cmd": "sum", "role": "math"}}}))
        .await;
    assert_eq!(found["result"]["found"], json!(true));
    assert_eq!(found["result"]["action"]["plugin"], json!("root"));
}

#[tokio::test]
async fn client_round_trips_results_and_errors() {
    let rt = remote_runtime();
    let client = connect(&rt).await;
    assert_eq!(client.handshake().protocol_version, courier::PROTOCOL_VERSION);

    let out = client
        .act(json!({"role": "math", "cmd": "sum", "a": 20, "b": 22}).as_object().unwrap().clone())
        .await
        .unwrap();
    assert_eq!(out, json!({"sum": 42}));

    let err = client
        .act(json!({"role": "math", "cmd": "fail"}).as_object().unwrap().clone())
        .await
        .unwrap_err();
    match err {
        ClientError::Remote(remote) => {
            assert_eq!(remote.kind, ActErrorKind::Handler);
            assert!(remote.message.contains("division by zero"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let patterns = client.list(Some("role:math")).await.unwrap();
    assert_eq!(patterns.len(), 2);
    assert!(!client.is_closed());
}

#[tokio::test]
async fn concurrent_client_requests_are_matched_by_id() {
    let rt = remote_runtime();
    rt.add(
        "role:math,cmd:slow",
        Action::future(|msg, _| async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok::<_, anyhow::Error>(json!({ "slow": msg.get("n").cloned() }))
        }),
    )
    .unwrap();
    let client = connect(&rt).await;

    let slow = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .act(json!({"role": "math", "cmd": "slow", "n": 1}).as_object().unwrap().clone())
                .await
        })
    };
    let fast = client
        .act(json!({"role": "math", "cmd": "sum", "a": 1, "b": 1}).as_object().unwrap().clone())
        .await
        .unwrap();
    assert_eq!(fast, json!({"sum": 2}));
    assert_eq!(slow.await.unwrap().unwrap(), json!({"slow": 1}));
}

#[tokio::test]
async fn remote_patterns_proxy_through_the_client_transport() {
    let remote = remote_runtime();
    let transport = connect(&remote).await;

    let local = Runtime::new(RuntimeConfig::default());
    local.client(["role:math"], transport).unwrap();

    let def = local.find("role:math").unwrap();
    assert_eq!(def.plugin().full_name, "client$ndjson");

    let out = local.act("role:math,cmd:sum,a:4,b:5").await.unwrap();
    assert_eq!(out, json!({"sum": 9}));

    // Remote dispatch errors keep their kind
    let err = local.act("role:math,cmd:missing").await.unwrap_err();
    assert_eq!(err.kind, ActErrorKind::NotFound);
    let err = local.act("role:math,cmd:fail").await.unwrap_err();
    assert_eq!(err.kind, ActErrorKind::Handler);

    // Local patterns still win when more specific
    local
        .add("role:math,cmd:sum,a:0", Action::sync(|_, _| Ok(json!({"local": true}))))
        .unwrap();
    let out = local.act("role:math,cmd:sum,a:0,b:1").await.unwrap();
    assert_eq!(out, json!({"local": true}));
}

#[tokio::test]
async fn closed_connection_becomes_a_transport_error() {
    let remote = remote_runtime();
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let service = Service::new(remote.root());
    let server = tokio::spawn(async move {
        let (read, write) = tokio::io::split(server_end);
        service.run(BufReader::new(read), write).await
    });

    let (read, write) = tokio::io::split(client_end);
    let transport = NdjsonTransport::start(read, write, "short-lived").await.unwrap();
    server.abort();
    let _ = server.await;

    let local = Runtime::new(RuntimeConfig::default());
    local.client(["role:math"], transport).unwrap();
    let err = local.act("role:math,cmd:sum").await.unwrap_err();
    assert_eq!(err.kind, ActErrorKind::Transport);
}

#[tokio::test]
async fn local_transport_forwards_in_process() {
    let remote = remote_runtime();
    let local = Runtime::new(RuntimeConfig::default());
    local
        .client(["role:math"], LocalTransport::new(remote.root()))
        .unwrap();

    assert_eq!(
        local.find("role:math").unwrap().plugin().full_name,
        "client$local"
    );
    let out = local.act("role:math,cmd:sum,a:1,b:2").await.unwrap();
    assert_eq!(out, json!({"sum": 3}));
}
