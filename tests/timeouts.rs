use courier::{Action, ActErrorKind, Runtime, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

fn runtime(timeout_ms: u64) -> Runtime {
    Runtime::new(RuntimeConfig {
        builtins: false,
        timeout_ms,
        ..RuntimeConfig::default()
    })
}

fn sleeper() -> Action {
    Action::future(|msg, _| async move {
        let ms = msg.get("sleep").and_then(|v| v.as_u64()).unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, anyhow::Error>(json!({ "slept": ms }))
    })
}

#[tokio::test]
async fn slow_handler_times_out() {
    let rt = runtime(50);
    rt.add("cmd:slow", sleeper()).unwrap();

    let err = rt.act("cmd:slow,sleep:500").await.unwrap_err();
    assert_eq!(err.kind, ActErrorKind::Timeout);
    assert_eq!(err.code, "action_timeout");
    assert_eq!(err.details["timeout_ms"], json!(50));
    assert_eq!(err.pattern.as_deref(), Some("cmd:\"slow\""));

    let stats = rt.stats_for("cmd:slow").unwrap();
    assert_eq!(stats.timeouts, 1);
}

#[tokio::test]
async fn timeout_directive_overrides_the_default() {
    let rt = runtime(5_000);
    rt.add("cmd:slow", sleeper()).unwrap();

    let err = rt
        .act(json!({"cmd": "slow", "sleep": 500, "timeout$": 20}))
        .await
        .unwrap_err();
    assert!(err.is(ActErrorKind::Timeout));

    let out = rt.act("cmd:slow,sleep:5").await.unwrap();
    assert_eq!(out, json!({"slept": 5}));
}

#[tokio::test]
async fn callback_that_never_replies_times_out() {
    let rt = runtime(30);
    rt.add(
        "cmd:silent",
        Action::callback(|_, _, reply| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                reply.ok(json!({}));
            });
        }),
    )
    .unwrap();

    let err = rt.act("cmd:silent").await.unwrap_err();
    assert_eq!(err.kind, ActErrorKind::Timeout);
}

#[tokio::test]
async fn late_reply_is_not_delivered_twice() {
    let rt = runtime(30);
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();
    rt.add(
        "cmd:late",
        Action::callback(move |_, _, reply| {
            let counter = counter.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                reply.ok(json!({"late": true}));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }),
    )
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    rt.act_with("cmd:late", move |result| {
        let _ = tx.send(result);
    });

    let first = rx.recv().await.unwrap();
    assert!(first.unwrap_err().is(ActErrorKind::Timeout));

    // Let the handler reply after the deadline
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    // The callback consumed the only sender; no second result can arrive
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn act_with_delivers_exactly_once() {
    let rt = runtime(1_000);
    rt.add("cmd:fast", Action::sync(|_, _| Ok(json!({"fast": true}))))
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let seen = calls.clone();
    rt.act_with("cmd:fast", move |result| {
        seen.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(result);
    });

    let result = rx.await.unwrap();
    assert_eq!(result.unwrap(), json!({"fast": true}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn prior_shares_the_callers_deadline() {
    let rt = runtime(60);
    rt.add("cmd:calc", sleeper()).unwrap();
    rt.add(
        "cmd:calc",
        Action::future(|msg, delegate| async move {
            Ok::<_, anyhow::Error>(delegate.prior(msg).await?)
        }),
    )
    .unwrap();

    let err = rt.act("cmd:calc,sleep:500").await.unwrap_err();
    assert_eq!(err.kind, ActErrorKind::Timeout);

    let out = rt.act("cmd:calc,sleep:1").await.unwrap();
    assert_eq!(out, json!({"slept": 1}));
}

#[tokio::test]
async fn concurrent_acts_complete_independently() {
    let rt = Arc::new(runtime(2_000));
    rt.add("cmd:slow", sleeper()).unwrap();

    let mut handles = Vec::new();
    for ms in [30u64, 10, 20] {
        let rt = rt.clone();
        handles.push(tokio::spawn(async move {
            rt.act(json!({"cmd": "slow", "sleep": ms})).await
        }));
    }

    for (handle, ms) in handles.into_iter().zip([30u64, 10, 20]) {
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out, json!({ "slept": ms }));
    }
}
