//! Registration and dispatch pipelines
//!
//! Three [`Ward`]s carry every cross-cutting concern of the runtime:
//!
//! - `add`: turns a raw pattern and handler into an [`ActionDefinition`]
//! - `inward`: resolves an inbound message and decides whether the handler runs
//! - `outward`: shapes and accounts for the outcome once the handler replied
//!
//! Stage order is fixed when [`Wards::new`] builds them. The pattern index and
//! the handler call know nothing about these stages.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::{AssertUnwindSafe, Location};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::Services;
use super::action::{Action, ActionDefinition, ActionFn};
use super::delegate::Delegate;
use super::error::{ActError, ActErrorKind, ActResult, RegistrationError, RegistrationResult};
use super::invocation::{Frame, FrameKind, InvocationRecord, TraceId};
use super::message::{self, META_DEFAULT, META_TRACE, Message, is_meta_key};
use super::pattern::Pattern;
use super::plugin::{PluginIdentity, ReadyGate};
use super::registry::IndexSnapshot;
use super::rules::Rules;
use super::stats::UNMATCHED;
use super::ward::Ward;

/// Post-processing hook applied to each definition before it is published
pub type Modifier = Arc<dyn Fn(&mut ActionDefinition) -> Result<(), String> + Send + Sync>;

/// Passive listener notified after matching acts complete
pub type Listener = Arc<dyn Fn(&Message, Result<&Value, &ActError>) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Subscriber {
    pub(crate) pattern: Pattern,
    pub(crate) listener: Listener,
}

/// Announcement emitted after every completed act
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActEvent {
    /// Id of the act
    pub action_id: String,
    /// Causal trace id
    pub trace: String,
    /// Canonical pattern of the resolved action
    pub pattern: Option<String>,
    /// Failure kind, `None` on success
    pub error: Option<ActErrorKind>,
    /// Latency in milliseconds
    pub elapsed_ms: u64,
    /// Whether the result came from the replay cache
    pub replayed: bool,
}

// ---------------------------------------------------------------------------
// Registration

pub(crate) struct AddContext {
    services: Arc<Services>,
    modifiers: Arc<Vec<Modifier>>,
}

/// A registration request travelling through the `add` stages
pub(crate) struct AddSpec {
    raw: Message,
    fixed: Arc<Message>,
    action: Option<Action>,
    rules: Option<Rules>,
    identity: PluginIdentity,
    gate: Option<ReadyGate>,
    location: &'static Location<'static>,

    id: String,
    seq: u64,
    pattern: Option<Pattern>,
    callpoint: String,
    func: Option<ActionFn>,
    style: &'static str,
    overrides: Option<String>,
    definition: Option<ActionDefinition>,
}

impl AddSpec {
    pub(crate) fn new(
        raw: Message,
        action: Action,
        rules: Option<Rules>,
        delegate: &Delegate,
        location: &'static Location<'static>,
    ) -> Self {
        Self {
            raw,
            fixed: delegate.fixed.clone(),
            action: Some(action),
            rules,
            identity: delegate.plugin.clone(),
            gate: delegate.gate.clone(),
            location,
            id: String::new(),
            seq: 0,
            pattern: None,
            callpoint: String::new(),
            func: None,
            style: "",
            overrides: None,
            definition: None,
        }
    }

    fn canonical(&self) -> String {
        self.pattern
            .as_ref()
            .map(|pattern| pattern.canonical().to_string())
            .unwrap_or_else(|| message::summary(&self.raw))
    }
}

fn stage_prepare(ctx: &mut AddContext, spec: &mut AddSpec) -> Option<RegistrationError> {
    if ctx.services.is_closed() {
        return Some(RegistrationError::Closed);
    }
    for (key, value) in spec.fixed.iter() {
        if !is_meta_key(key) {
            spec.raw.insert(key.clone(), value.clone());
        }
    }
    let pattern = match Pattern::from_message(&spec.raw) {
        Ok(pattern) => pattern,
        Err(err) => return Some(err.into()),
    };
    spec.seq = ctx.services.index.next_seq();
    let digest = blake3::hash(pattern.canonical().as_bytes()).to_hex();
    spec.id = format!("{}/{}", &digest.as_str()[..8], spec.seq);
    spec.pattern = Some(pattern);
    None
}

fn stage_plugin(_ctx: &mut AddContext, spec: &mut AddSpec) -> Option<RegistrationError> {
    if spec.identity.name.is_empty() {
        return Some(RegistrationError::Rejected {
            stage: "plugin".to_string(),
            pattern: spec.canonical(),
            detail: "plugin name is empty".to_string(),
        });
    }
    // Root actions never wait on a readiness gate
    if spec.identity == PluginIdentity::root() {
        spec.gate = None;
    }
    None
}

fn stage_callpoint(_ctx: &mut AddContext, spec: &mut AddSpec) -> Option<RegistrationError> {
    spec.callpoint = format!("{}@{}", spec.identity.full_name, spec.location);
    None
}

fn stage_flags(ctx: &mut AddContext, spec: &mut AddSpec) -> Option<RegistrationError> {
    if !ctx.services.config.strict_add {
        return None;
    }
    let pattern = spec.pattern.as_ref()?;
    ctx.services
        .index
        .ambiguous_with(pattern)
        .map(|existing| RegistrationError::Ambiguous {
            pattern: pattern.canonical().to_string(),
            existing,
        })
}

fn stage_action(_ctx: &mut AddContext, spec: &mut AddSpec) -> Option<RegistrationError> {
    let Some(action) = spec.action.take() else {
        return Some(RegistrationError::Rejected {
            stage: "action".to_string(),
            pattern: spec.canonical(),
            detail: "no handler supplied".to_string(),
        });
    };
    spec.style = action.style();
    spec.func = Some(action.normalize());
    None
}

fn stage_prior(ctx: &mut AddContext, spec: &mut AddSpec) -> Option<RegistrationError> {
    let pattern = spec.pattern.as_ref()?;
    if let Some(existing) = ctx.services.index.find(pattern) {
        debug!(
            pattern = %pattern,
            prior = existing.id(),
            "override registered; existing action becomes prior"
        );
        spec.overrides = Some(existing.id().to_string());
    }
    None
}

fn stage_rules(_ctx: &mut AddContext, spec: &mut AddSpec) -> Option<RegistrationError> {
    let rules = spec.rules.take()?;
    if rules.is_empty() {
        return None;
    }
    if let Some(key) = rules.keys().find(|key| key.is_empty() || is_meta_key(key)) {
        return Some(RegistrationError::Rules {
            pattern: spec.canonical(),
            detail: format!("cannot declare rules for key '{}'", key),
        });
    }
    spec.rules = Some(rules);
    None
}

fn stage_register(_ctx: &mut AddContext, spec: &mut AddSpec) -> Option<RegistrationError> {
    let (Some(pattern), Some(func)) = (spec.pattern.take(), spec.func.take()) else {
        return Some(RegistrationError::Rejected {
            stage: "register".to_string(),
            pattern: spec.canonical(),
            detail: "definition is incomplete".to_string(),
        });
    };
    spec.definition = Some(ActionDefinition {
        id: std::mem::take(&mut spec.id),
        seq: spec.seq,
        pattern,
        raw: spec.raw.clone(),
        plugin: spec.identity.clone(),
        rules: spec.rules.take(),
        callpoint: std::mem::take(&mut spec.callpoint),
        style: spec.style,
        func,
        prior: None,
        gate: spec.gate.clone(),
        registered_at: chrono::Utc::now(),
    });
    None
}

fn stage_modify(ctx: &mut AddContext, spec: &mut AddSpec) -> Option<RegistrationError> {
    let definition = spec.definition.as_mut()?;
    for modifier in ctx.modifiers.iter() {
        if let Err(detail) = modifier(definition) {
            return Some(RegistrationError::Rejected {
                stage: "modify".to_string(),
                pattern: definition.canonical().to_string(),
                detail,
            });
        }
    }
    None
}

/// Run the `add` stages and publish the finished definition
pub(crate) fn register(services: &Arc<Services>, spec: AddSpec) -> RegistrationResult<Arc<ActionDefinition>> {
    let mut ctx = AddContext {
        services: services.clone(),
        modifiers: services.modifiers.read().clone(),
    };
    let mut spec = spec;

    if let Some(halt) = services.wards.add.process(&mut ctx, &mut spec) {
        warn!(stage = halt.name, error = %halt.result, "registration rejected");
        return Err(halt.result);
    }

    let Some(definition) = spec.definition.take() else {
        return Err(RegistrationError::Rejected {
            stage: "register".to_string(),
            pattern: spec.canonical(),
            detail: "no definition produced".to_string(),
        });
    };

    let definition = services.index.register(definition);
    debug!(
        pattern = definition.canonical(),
        id = definition.id(),
        plugin = %definition.plugin(),
        style = definition.style(),
        overrides = spec.overrides.as_deref(),
        "action registered"
    );
    Ok(definition)
}

// ---------------------------------------------------------------------------
// Dispatch

pub(crate) struct ActContext {
    services: Arc<Services>,
    snapshot: Arc<IndexSnapshot>,
}

pub(crate) struct Invocation {
    record: InvocationRecord,
    frame: Option<Arc<Frame>>,
    replayed: bool,
}

/// Early answer of the inward stages; `None` from every stage means "run the handler"
pub(crate) enum Inward {
    Reply(Value),
    Fail(ActError),
}

fn stage_closed(ctx: &mut ActContext, _inv: &mut Invocation) -> Option<Inward> {
    ctx.services.is_closed().then(|| Inward::Fail(ActError::closed()))
}

fn stage_resolve(ctx: &mut ActContext, inv: &mut Invocation) -> Option<Inward> {
    if let Some(definition) = ctx.snapshot.resolve(&inv.record.message) {
        inv.record.definition = Some(definition.clone());
        return None;
    }
    if let Some(default) = inv.record.message.get(META_DEFAULT) {
        return Some(Inward::Reply(default.clone()));
    }
    Some(Inward::Fail(
        ActError::not_found(message::summary(&inv.record.message))
            .with_details(Value::Object(message::strip_meta(&inv.record.message))),
    ))
}

fn stage_validate(_ctx: &mut ActContext, inv: &mut Invocation) -> Option<Inward> {
    let definition = inv.record.definition.as_ref()?;
    validate(definition, &inv.record.message).err().map(Inward::Fail)
}

fn stage_history(ctx: &mut ActContext, inv: &mut Invocation) -> Option<Inward> {
    message::id_of(&inv.record.message)?;
    let cached = ctx.services.history.get(&inv.record.fingerprint)?;
    inv.replayed = true;
    Some(Inward::Reply(cached))
}

fn stage_loop(ctx: &mut ActContext, inv: &mut Invocation) -> Option<Inward> {
    let definition = inv.record.definition.as_ref()?;
    match Frame::enter(
        inv.record.parent.as_ref(),
        definition,
        &inv.record.fingerprint,
        FrameKind::Act,
        ctx.services.config.max_depth,
    ) {
        Ok(frame) => {
            inv.frame = Some(frame);
            None
        }
        Err(err) => Some(Inward::Fail(err)),
    }
}

/// Check a message against a definition's rules
pub(crate) fn validate(definition: &ActionDefinition, message: &Message) -> ActResult<()> {
    let Some(rules) = definition.rules() else {
        return Ok(());
    };
    rules.validate(message).map_err(|violations| {
        let detail: Vec<String> = violations.iter().map(|v| v.detail.clone()).collect();
        ActError::validation(format!(
            "Invalid message for {}: {}",
            definition.canonical(),
            detail.join("; ")
        ))
        .with_pattern(definition.canonical())
        .with_details(serde_json::json!({
            "violations": violations
                .iter()
                .map(|v| serde_json::json!({ "key": v.key, "detail": v.detail }))
                .collect::<Vec<_>>(),
        }))
    })
}

/// Handler outcome before error normalization
pub(crate) enum Answer {
    Value(Value),
    Raw(anyhow::Error),
    Error(ActError),
}

pub(crate) struct OutContext {
    services: Arc<Services>,
}

pub(crate) struct Outcome {
    record: InvocationRecord,
    frame: Option<Arc<Frame>>,
    answer: Answer,
    replayed: bool,
}

impl Outcome {
    fn pattern(&self) -> &str {
        self.record.pattern().unwrap_or(UNMATCHED)
    }

    fn result(&self) -> Result<&Value, ActError> {
        match &self.answer {
            Answer::Value(value) => Ok(value),
            Answer::Error(err) => Err(err.clone()),
            Answer::Raw(err) => Err(ActError::new(ActErrorKind::Handler, err.to_string())),
        }
    }

    fn failure(&self) -> Option<ActErrorKind> {
        match &self.answer {
            Answer::Value(_) => None,
            Answer::Error(err) => Some(err.kind),
            Answer::Raw(_) => Some(ActErrorKind::Handler),
        }
    }

    fn into_result(self) -> ActResult<Value> {
        match self.answer {
            Answer::Value(value) => Ok(value),
            Answer::Error(err) => Err(err),
            Answer::Raw(err) => Err(ActError::from_handler(err)),
        }
    }
}

fn stage_error(_ctx: &mut OutContext, out: &mut Outcome) -> Option<String> {
    let pattern = out.record.pattern().map(str::to_string);
    let answer = std::mem::replace(&mut out.answer, Answer::Value(Value::Null));
    out.answer = match answer {
        Answer::Raw(err) => {
            let mut normalized = ActError::from_handler(err);
            if let Some(pattern) = pattern {
                normalized = normalized.with_pattern(pattern);
            }
            debug!(
                action_id = %out.record.action_id,
                code = %normalized.code,
                "handler failed: {}",
                normalized.message
            );
            Answer::Error(normalized)
        }
        Answer::Error(err) => Answer::Error(match pattern {
            Some(pattern) => err.with_pattern(pattern),
            None => err,
        }),
        value => value,
    };
    None
}

fn stage_cache(ctx: &mut OutContext, out: &mut Outcome) -> Option<String> {
    if out.replayed || message::id_of(&out.record.message).is_none() {
        return None;
    }
    if let Answer::Value(value) = &out.answer {
        ctx.services
            .history
            .insert(out.record.fingerprint.clone(), value.clone());
    }
    None
}

fn stage_stats(ctx: &mut OutContext, out: &mut Outcome) -> Option<String> {
    if ctx.services.config.stats {
        ctx.services.stats.record(
            out.pattern(),
            out.record.elapsed_ms(),
            out.failure(),
            out.replayed,
        );
    }
    None
}

/// Results are always objects: `null` becomes `{}`, other scalars `{"value": x}`
fn as_result_object(value: Value) -> Value {
    match value {
        Value::Null => Value::Object(Map::new()),
        object @ Value::Object(_) => object,
        other => serde_json::json!({ "value": other }),
    }
}

fn strip_result_meta(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|key, _| !is_meta_key(key));
    }
}

fn stage_response(_ctx: &mut OutContext, out: &mut Outcome) -> Option<String> {
    if let Answer::Value(value) = &mut out.answer {
        *value = as_result_object(value.take());
    }
    None
}

fn stage_announce(ctx: &mut OutContext, out: &mut Outcome) -> Option<String> {
    let event = ActEvent {
        action_id: out.record.action_id.to_string(),
        trace: out.record.trace.to_string(),
        pattern: out.record.pattern().map(str::to_string),
        error: out.failure(),
        elapsed_ms: out.record.elapsed_ms(),
        replayed: out.replayed,
    };
    // No receivers is the normal case
    let _ = ctx.services.events.send(event);
    None
}

fn stage_trace(ctx: &mut OutContext, out: &mut Outcome) -> Option<String> {
    let trace = out.record.trace.to_string();
    if let Answer::Error(err) = &mut out.answer {
        if err.details.is_null() {
            err.details = Value::Object(Map::new());
        }
        if let Value::Object(details) = &mut err.details {
            details
                .entry("trace")
                .or_insert_with(|| Value::String(trace.clone()));
        }
    }
    if ctx.services.config.trace {
        debug!(
            trace = %trace,
            action_id = %out.record.action_id,
            pattern = out.pattern(),
            chain = ?out.frame.as_ref().map(|frame| frame.ids()),
            elapsed_ms = out.record.elapsed_ms(),
            ok = out.failure().is_none(),
            "act"
        );
    }
    None
}

fn stage_entity(_ctx: &mut OutContext, out: &mut Outcome) -> Option<String> {
    if let Answer::Value(value) = &mut out.answer {
        strip_result_meta(value);
    }
    None
}

fn stage_subscribers(ctx: &mut OutContext, out: &mut Outcome) -> Option<String> {
    let subscribers = ctx.services.subscribers.read().clone();
    if subscribers.is_empty() {
        return None;
    }
    let result = out.result();
    let result = match &result {
        Ok(value) => Ok(*value),
        Err(err) => Err(err),
    };

    let mut faults = Vec::new();
    for subscriber in subscribers.iter() {
        if !subscriber.pattern.matches(&out.record.message) {
            continue;
        }
        let notified = std::panic::catch_unwind(AssertUnwindSafe(|| {
            (subscriber.listener)(&out.record.message, result)
        }));
        if notified.is_err() {
            faults.push(subscriber.pattern.canonical().to_string());
        }
    }
    (!faults.is_empty()).then(|| format!("subscriber panicked: {}", faults.join(", ")))
}

/// The three stage lists of a runtime
pub(crate) struct Wards {
    pub(crate) add: Ward<AddContext, AddSpec, RegistrationError>,
    pub(crate) inward: Ward<ActContext, Invocation, Inward>,
    pub(crate) outward: Ward<OutContext, Outcome, String>,
}

impl Wards {
    pub(crate) fn new() -> Self {
        let mut add = Ward::new("add");
        add.add("prepare", stage_prepare)
            .add("plugin", stage_plugin)
            .add("callpoint", stage_callpoint)
            .add("flags", stage_flags)
            .add("action", stage_action)
            .add("prior", stage_prior)
            .add("rules", stage_rules)
            .add("register", stage_register)
            .add("modify", stage_modify);

        let mut inward = Ward::new("inward");
        inward
            .add("closed", stage_closed)
            .add("resolve", stage_resolve)
            .add("validate", stage_validate)
            .add("history", stage_history)
            .add("loop", stage_loop);

        let mut outward = Ward::new("outward");
        outward
            .add("error", stage_error)
            .add("cache", stage_cache)
            .add("stats", stage_stats)
            .add("response", stage_response)
            .add("announce", stage_announce)
            .add("trace", stage_trace)
            .add("entity", stage_entity)
            .add("subscribers", stage_subscribers);

        Self { add, inward, outward }
    }
}

/// Dispatch a composed message: inward stages, handler call, outward stages.
///
/// Always produces exactly one result.
pub(crate) async fn dispatch(delegate: &Delegate, mut message: Message) -> ActResult<Value> {
    let services = delegate.services.clone();

    let trace = message::trace_of(&message)
        .map(|trace| TraceId(trace.to_string()))
        .or_else(|| delegate.trace.clone())
        .unwrap_or_default();
    message.insert(META_TRACE.to_string(), Value::String(trace.to_string()));

    let record = InvocationRecord::new(
        message,
        delegate.frame.clone(),
        trace,
        services.config.timeout_ms,
    );
    let mut ctx = ActContext {
        services: services.clone(),
        snapshot: services.index.snapshot(),
    };
    let mut inv = Invocation {
        record,
        frame: None,
        replayed: false,
    };

    let early = services
        .wards
        .inward
        .process(&mut ctx, &mut inv)
        .map(|halt| halt.result);
    let answer = match early {
        Some(Inward::Reply(value)) => Answer::Value(value),
        Some(Inward::Fail(err)) => Answer::Error(err),
        None => execute(delegate, &inv).await,
    };

    let mut out = Outcome {
        record: inv.record,
        frame: inv.frame,
        answer,
        replayed: inv.replayed,
    };
    let mut octx = OutContext {
        services: services.clone(),
    };
    let mut start = 0;
    while let Some(halt) = services.wards.outward.process_from(start, &mut octx, &mut out) {
        warn!(
            stage = halt.name,
            action_id = %halt.data.record.action_id,
            "outward stage failed: {}",
            halt.result
        );
        start = halt.index + 1;
    }
    out.into_result()
}

/// Run the resolved handler in its own task under the invocation deadline
async fn execute(delegate: &Delegate, inv: &Invocation) -> Answer {
    let Some(definition) = inv.record.definition.clone() else {
        return Answer::Error(ActError::not_found(message::summary(&inv.record.message)));
    };
    let timeout_ms = inv.record.timeout_ms;
    let gate = definition
        .gate
        .clone()
        .filter(|_| delegate.plugin != definition.plugin);
    let child = delegate.within(definition.clone(), inv.frame.clone(), inv.record.trace.clone());
    let message = inv.record.message.clone();
    let canonical = definition.canonical().to_string();

    let run = async move {
        if let Some(gate) = gate {
            gate.wait().await;
        }
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(definition.call(message, child))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(anyhow::anyhow!("handler panicked: {}", panic_message(&*panic))));
            // The caller may have timed out already; a late reply is dropped here
            let _ = tx.send(outcome);
        });
        rx.await
    };

    match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
        Err(_) => {
            warn!(
                pattern = %canonical,
                action_id = %inv.record.action_id,
                timeout_ms,
                "action timed out"
            );
            Answer::Error(ActError::timeout(timeout_ms).with_pattern(canonical))
        }
        Ok(Err(_)) => Answer::Raw(anyhow::anyhow!("handler task ended without replying")),
        Ok(Ok(Ok(value))) => Answer::Value(value),
        Ok(Ok(Err(err))) => Answer::Raw(err),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run the prior of the current definition inline, within the caller's deadline
pub(crate) async fn call_prior(delegate: &Delegate, message: Message) -> ActResult<Value> {
    let Some(current) = delegate.current.as_ref() else {
        return Err(
            ActError::new(ActErrorKind::Handler, "prior called outside of an action")
                .with_code("no_prior_context"),
        );
    };
    let Some(prior) = current.prior().cloned() else {
        return Ok(Value::Object(Map::new()));
    };

    let fingerprint = message::fingerprint(&message);
    let frame = Frame::enter(
        delegate.frame.as_ref(),
        &prior,
        &fingerprint,
        FrameKind::Prior,
        delegate.services.config.max_depth,
    )?;
    validate(&prior, &message)?;

    let trace = delegate.trace.clone().unwrap_or_default();
    let child = delegate.within(prior.clone(), Some(frame), trace);
    let mut value = prior
        .call(message, child)
        .await
        .map_err(|err| ActError::from_handler(err).with_pattern(prior.canonical()))
        .map(as_result_object)?;
    strip_result_meta(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let wards = Wards::new();
        assert_eq!(
            wards.add.tasknames(),
            vec!["prepare", "plugin", "callpoint", "flags", "action", "prior", "rules", "register", "modify"]
        );
        assert_eq!(
            wards.inward.tasknames(),
            vec!["closed", "resolve", "validate", "history", "loop"]
        );
        assert_eq!(
            wards.outward.to_string(),
            "outward:[error,cache,stats,response,announce,trace,entity,subscribers]"
        );
    }

    #[test]
    fn test_results_are_shaped_into_objects() {
        assert_eq!(as_result_object(Value::Null), serde_json::json!({}));
        assert_eq!(as_result_object(serde_json::json!(5)), serde_json::json!({"value": 5}));
        let mut value = as_result_object(serde_json::json!({"total": 1, "id$": "x"}));
        strip_result_meta(&mut value);
        assert_eq!(value, serde_json::json!({"total": 1}));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
