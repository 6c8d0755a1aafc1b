//! Action patterns, canonical form and matching
//!
//! A pattern is a set of key constraints. Each constraint either requires an
//! exact value or only the presence of the key (`*`). Patterns are open: keys
//! of a message that the pattern does not mention never prevent a match.
//!
//! The canonical form sorts constraints by key, so two patterns built from the
//! same key/value set always share an identity regardless of key order.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;

use super::error::PatternError;
use super::message::{self, IntoMessage, Message, is_meta_key};

/// Marker for "key present, any value" and, as a key, for the open wildcard
pub const WILDCARD: &str = "*";

/// A single key constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternValue {
    /// The message value must be equal: numbers by value, everything else
    /// exactly (no coercion across types)
    Literal(Value),
    /// The key must be present
    Wildcard,
}

impl PatternValue {
    /// Check a message value against this constraint
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Literal(expected) => same_scalar(expected, value),
            Self::Wildcard => true,
        }
    }

    fn encode(&self) -> String {
        match self {
            Self::Literal(value) => value.to_string(),
            Self::Wildcard => WILDCARD.to_string(),
        }
    }
}

/// Ranking of a pattern: more constraints first, then more literal constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Specificity {
    /// Number of constrained keys
    pub constrained: usize,
    /// Number of constraints requiring an exact value
    pub literals: usize,
}

/// A canonicalized action pattern
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    constraints: Vec<(String, PatternValue)>,
    canonical: String,
}

impl Pattern {
    /// Build a pattern from a message-shaped mapping.
    ///
    /// Meta keys and the open wildcard key are dropped. Values must be scalars;
    /// the string `"*"` becomes a wildcard constraint.
    pub fn from_message(raw: &Message) -> Result<Self, PatternError> {
        let mut constraints = Vec::with_capacity(raw.len());

        for (key, value) in raw {
            if is_meta_key(key) || key == WILDCARD {
                continue;
            }
            validate_key(key)?;

            let constraint = match value {
                Value::String(text) if text == WILDCARD => PatternValue::Wildcard,
                Value::Object(_) | Value::Array(_) => {
                    return Err(PatternError::InvalidValue {
                        key: key.clone(),
                        detail: "pattern values must be scalars".to_string(),
                    });
                }
                scalar => PatternValue::Literal(normalize_number(scalar)),
            };
            constraints.push((key.clone(), constraint));
        }

        if constraints.is_empty() {
            return Err(PatternError::Empty);
        }

        // Map keys are unique already; sorting gives the canonical order
        constraints.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical = constraints
            .iter()
            .map(|(key, value)| format!("{}:{}", key, value.encode()))
            .collect::<Vec<_>>()
            .join(",");

        Ok(Self {
            constraints,
            canonical,
        })
    }

    /// Parse the compact `key:value,...` form
    pub fn parse(input: &str) -> Result<Self, PatternError> {
        Self::from_message(&message::parse_compact(input)?)
    }

    /// Canonical string form, used as the index key
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Constraints in canonical (key-sorted) order
    pub fn constraints(&self) -> &[(String, PatternValue)] {
        &self.constraints
    }

    /// Number of constrained keys
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Patterns are never empty once built
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Specificity used to rank competing matches
    pub fn specificity(&self) -> Specificity {
        Specificity {
            constrained: self.constraints.len(),
            literals: self
                .constraints
                .iter()
                .filter(|(_, value)| matches!(value, PatternValue::Literal(_)))
                .count(),
        }
    }

    /// Check whether every constraint is satisfied by the message
    pub fn matches(&self, message: &Message) -> bool {
        self.constraints.iter().all(|(key, constraint)| {
            message
                .get(key)
                .is_some_and(|value| constraint.accepts(value))
        })
    }

    /// Check whether this pattern carries every constraint of a partial query.
    ///
    /// A literal query constraint is satisfied by the same literal or by a
    /// wildcard; a wildcard query constraint only requires the key.
    pub fn covers(&self, query: &Pattern) -> bool {
        query.constraints.iter().all(|(key, wanted)| {
            match self.lookup(key) {
                None => false,
                Some(PatternValue::Wildcard) => true,
                Some(PatternValue::Literal(value)) => wanted.accepts(value),
            }
        })
    }

    /// Check whether some message could match both patterns
    pub fn overlaps(&self, other: &Pattern) -> bool {
        self.constraints.iter().all(|(key, mine)| match (mine, other.lookup(key)) {
            (PatternValue::Literal(a), Some(PatternValue::Literal(b))) => same_scalar(a, b),
            _ => true,
        })
    }

    /// Constraint for a key, if any
    pub fn lookup(&self, key: &str) -> Option<&PatternValue> {
        self.constraints
            .binary_search_by(|(candidate, _)| candidate.as_str().cmp(key))
            .ok()
            .map(|index| &self.constraints[index].1)
    }

    /// Message-shaped view of the pattern (for display and tooling)
    pub fn to_message(&self) -> Message {
        self.constraints
            .iter()
            .map(|(key, value)| {
                let shown = match value {
                    PatternValue::Literal(value) => value.clone(),
                    PatternValue::Wildcard => Value::String(WILDCARD.to_string()),
                };
                (key.clone(), shown)
            })
            .collect()
    }

    /// Order by descending specificity; callers break ties themselves
    pub fn cmp_specificity(&self, other: &Pattern) -> Ordering {
        other.specificity().cmp(&self.specificity())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Scalar equality where `1` and `1.0` are the same number
pub fn same_scalar(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => same_number(x, y),
        _ => a == b,
    }
}

fn same_number(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Integral floats in integer range are stored as integers, so the canonical
/// form depends on the value and not on how it was written
fn normalize_number(value: &Value) -> Value {
    let Value::Number(number) = value else {
        return value.clone();
    };
    match number.as_f64() {
        Some(float)
            if number.is_f64()
                && float.fract() == 0.0
                && float >= i64::MIN as f64
                && float < i64::MAX as f64 =>
        {
            Value::from(float as i64)
        }
        _ => value.clone(),
    }
}

fn validate_key(key: &str) -> Result<(), PatternError> {
    if key.is_empty() || key.contains(':') || key.contains(',') {
        return Err(PatternError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Conversion into a [`Pattern`]
pub trait IntoPattern {
    /// Perform the conversion
    fn into_pattern(self) -> Result<Pattern, PatternError>;
}

impl IntoPattern for Pattern {
    fn into_pattern(self) -> Result<Pattern, PatternError> {
        Ok(self)
    }
}

impl IntoPattern for &Pattern {
    fn into_pattern(self) -> Result<Pattern, PatternError> {
        Ok(self.clone())
    }
}

impl IntoPattern for &str {
    fn into_pattern(self) -> Result<Pattern, PatternError> {
        Pattern::parse(self)
    }
}

impl IntoPattern for String {
    fn into_pattern(self) -> Result<Pattern, PatternError> {
        Pattern::parse(&self)
    }
}

impl IntoPattern for Value {
    fn into_pattern(self) -> Result<Pattern, PatternError> {
        Pattern::from_message(&self.into_message()?)
    }
}

impl IntoPattern for Message {
    fn into_pattern(self) -> Result<Pattern, PatternError> {
        Pattern::from_message(&self)
    }
}

impl IntoPattern for &Message {
    fn into_pattern(self) -> Result<Pattern, PatternError> {
        Pattern::from_message(self)
    }
}

impl IntoMessage for Pattern {
    fn into_message(self) -> Result<Message, PatternError> {
        Ok(self.to_message())
    }
}

impl IntoMessage for &Pattern {
    fn into_message(self) -> Result<Message, PatternError> {
        Ok(self.to_message())
    }
}
