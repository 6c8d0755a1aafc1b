//! Messages, meta keys and fingerprints
//!
//! A message is a flat JSON object. Keys ending in `$` are meta keys carrying
//! out-of-band directives; they never take part in pattern matching.

use blake3::Hasher;
use serde_json::{Map, Value};

use super::error::PatternError;

/// A loosely structured message: string keys to JSON values
pub type Message = Map<String, Value>;

/// Suffix marking a meta key
pub const META_SUFFIX: char = '$';

/// Caller-supplied action id, enables idempotent replay
pub const META_ID: &str = "id$";
/// Per-call deadline override in milliseconds
pub const META_TIMEOUT: &str = "timeout$";
/// Result returned when no pattern matches
pub const META_DEFAULT: &str = "default$";
/// Causal trace id
pub const META_TRACE: &str = "trace$";

/// Check whether a key is a meta key
pub fn is_meta_key(key: &str) -> bool {
    key.ends_with(META_SUFFIX)
}

/// Copy of the message without meta keys
pub fn strip_meta(message: &Message) -> Message {
    message
        .iter()
        .filter(|(key, _)| !is_meta_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Read the `timeout$` directive
pub fn timeout_of(message: &Message) -> Option<u64> {
    message.get(META_TIMEOUT).and_then(Value::as_u64)
}

/// Read the `id$` directive
pub fn id_of(message: &Message) -> Option<&str> {
    message.get(META_ID).and_then(Value::as_str)
}

/// Read the `trace$` directive
pub fn trace_of(message: &Message) -> Option<&str> {
    message.get(META_TRACE).and_then(Value::as_str)
}

/// Short single-line summary for logs and error messages
pub fn summary(message: &Message) -> String {
    let mut keys: Vec<_> = message.iter().filter(|(key, _)| !is_meta_key(key)).collect();
    keys.sort_by(|a, b| a.0.cmp(b.0));
    let parts: Vec<String> = keys
        .into_iter()
        .map(|(key, value)| match value {
            Value::Object(_) | Value::Array(_) => format!("{}:…", key),
            other => format!("{}:{}", key, other),
        })
        .collect();
    format!("{{{}}}", parts.join(","))
}

/// Deterministic identifier of a message's matching keys.
///
/// Meta keys are ignored except `id$`, so that two replays of the same
/// caller-identified message share a fingerprint.
pub fn fingerprint(message: &Message) -> String {
    let mut keys: Vec<&String> = message.keys().filter(|key| !is_meta_key(key)).collect();
    keys.sort();

    let mut hasher = Hasher::new();
    if let Some(id) = id_of(message) {
        hasher.update(META_ID.as_bytes());
        hasher.update(id.as_bytes());
        hasher.update(b"|");
    }
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        // serde_json objects are key-sorted, so nested values encode stably
        let encoded = message[key.as_str()].to_string();
        hasher.update(encoded.as_bytes());
        hasher.update(b",");
    }
    hasher.finalize().to_hex().to_string()
}

/// Parse a single compact value: JSON scalar if possible, raw string otherwise
pub(crate) fn parse_scalar(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))) => value,
        _ => Value::String(text.to_string()),
    }
}

/// Split on commas outside double-quoted strings
fn split_entries(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (index, ch) in input.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&input[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Parse the compact `key:value,key:value` form.
///
/// Commas inside double-quoted values do not separate entries.
pub fn parse_compact(input: &str) -> Result<Message, PatternError> {
    let mut message = Message::new();
    let trimmed = input.trim().trim_start_matches('{').trim_end_matches('}');

    for part in split_entries(trimmed) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((key, value)) = part.split_once(':') else {
            return Err(PatternError::Syntax {
                input: input.to_string(),
                detail: format!("expected key:value, got '{}'", part),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(PatternError::InvalidKey(key.to_string()));
        }
        message.insert(key.to_string(), parse_scalar(value.trim()));
    }

    if message.is_empty() {
        return Err(PatternError::Empty);
    }
    Ok(message)
}

/// Conversion into a [`Message`]
pub trait IntoMessage {
    /// Perform the conversion
    fn into_message(self) -> Result<Message, PatternError>;
}

impl IntoMessage for Message {
    fn into_message(self) -> Result<Message, PatternError> {
        Ok(self)
    }
}

impl IntoMessage for Value {
    fn into_message(self) -> Result<Message, PatternError> {
        match self {
            Value::Object(map) => Ok(map),
            other => Err(PatternError::NotAnObject(other.to_string())),
        }
    }
}

impl IntoMessage for &str {
    fn into_message(self) -> Result<Message, PatternError> {
        parse_compact(self)
    }
}

impl IntoMessage for String {
    fn into_message(self) -> Result<Message, PatternError> {
        parse_compact(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_compact_scalars() {
        let msg = parse_compact("role:tax, cmd:calc, net:100, vip:true, note:\"a b\"").unwrap();
        assert_eq!(msg["role"], json!("tax"));
        assert_eq!(msg["net"], json!(100));
        assert_eq!(msg["vip"], json!(true));
        assert_eq!(msg["note"], json!("a b"));
    }

    #[test]
    fn test_parse_compact_keeps_quoted_commas() {
        let msg = parse_compact(r#"cmd:note,text:"a,b",quote:"say \"x,y\"",n:2"#).unwrap();
        assert_eq!(msg["text"], json!("a,b"));
        assert_eq!(msg["quote"], json!("say \"x,y\""));
        assert_eq!(msg["n"], json!(2));
        assert_eq!(msg.len(), 4);
    }

    #[test]
    fn test_parse_compact_rejects_garbage() {
        assert!(matches!(parse_compact("role"), Err(PatternError::Syntax { .. })));
        assert_eq!(parse_compact(" , "), Err(PatternError::Empty));
    }

    #[test]
    fn test_strip_meta() {
        let msg = json!({"a": 1, "id$": "x", "timeout$": 10}).into_message().unwrap();
        let stripped = strip_meta(&msg);
        assert_eq!(stripped.len(), 1);
        assert_eq!(timeout_of(&msg), Some(10));
        assert_eq!(id_of(&msg), Some("x"));
    }

    #[test]
    fn test_fingerprint_ignores_order_and_meta() {
        let a = json!({"a": 1, "b": "two", "trace$": "t1"}).into_message().unwrap();
        let b = json!({"b": "two", "a": 1}).into_message().unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let c = json!({"a": 1, "b": "two", "id$": "req-1"}).into_message().unwrap();
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_fingerprint_is_type_exact() {
        let a = json!({"a": 1}).into_message().unwrap();
        let b = json!({"a": "1"}).into_message().unwrap();
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
