//! Declarative message validation
//!
//! Rules are declared alongside a pattern and checked before the handler runs.
//! A failing message never reaches the handler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::message::Message;

/// JSON type names accepted by [`Rule::Type`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// JSON string
    String,
    /// JSON number
    Number,
    /// Integral JSON number
    Integer,
    /// JSON boolean
    Boolean,
    /// JSON object
    Object,
    /// JSON array
    Array,
}

impl ValueKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// A single constraint on one message key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Key must be present and not null
    Required,
    /// Value must have the given JSON type
    Type(ValueKind),
    /// Value must be one of the listed values
    OneOf(Vec<Value>),
    /// Numeric value must be at least this
    Min(f64),
    /// Numeric value must be at most this
    Max(f64),
}

impl Rule {
    /// Check a value; `None` means the key is absent.
    fn check(&self, key: &str, value: Option<&Value>) -> Result<(), String> {
        match (self, value) {
            (Self::Required, None | Some(Value::Null)) => Err(format!("'{}' is required", key)),
            (Self::Required, Some(_)) => Ok(()),
            // Optional keys only get checked when present
            (_, None) => Ok(()),
            (Self::Type(kind), Some(value)) if !kind.accepts(value) => {
                Err(format!("'{}' must be of type {:?}, got {}", key, kind, value))
            }
            (Self::OneOf(allowed), Some(value)) if !allowed.contains(value) => {
                Err(format!("'{}' must be one of {:?}, got {}", key, allowed, value))
            }
            (Self::Min(min), Some(value)) => match value.as_f64() {
                Some(n) if n >= *min => Ok(()),
                _ => Err(format!("'{}' must be a number >= {}, got {}", key, min, value)),
            },
            (Self::Max(max), Some(value)) => match value.as_f64() {
                Some(n) if n <= *max => Ok(()),
                _ => Err(format!("'{}' must be a number <= {}, got {}", key, max, value)),
            },
            _ => Ok(()),
        }
    }
}

/// Validation rules for an action, keyed by message key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    rules: BTreeMap<String, Vec<Rule>>,
}

/// A validation failure
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Offending key
    pub key: String,
    /// Description
    pub detail: String,
}

impl Rules {
    /// Empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule for a key
    pub fn rule(mut self, key: impl Into<String>, rule: Rule) -> Self {
        self.rules.entry(key.into()).or_default().push(rule);
        self
    }

    /// Shorthand: key required with a type
    pub fn require(self, key: impl Into<String>, kind: ValueKind) -> Self {
        let key = key.into();
        self.rule(key.clone(), Rule::Required).rule(key, Rule::Type(kind))
    }

    /// Combine two rule sets; rules for the same key accumulate
    pub fn merge(mut self, other: Rules) -> Self {
        for (key, rules) in other.rules {
            self.rules.entry(key).or_default().extend(rules);
        }
        self
    }

    /// Keys with at least one rule
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.rules.keys()
    }

    /// Whether any rule is declared
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check a message, collecting every violation
    pub fn validate(&self, message: &Message) -> Result<(), Vec<Violation>> {
        let violations: Vec<Violation> = self
            .rules
            .iter()
            .flat_map(|(key, rules)| {
                let value = message.get(key);
                rules.iter().filter_map(move |rule| {
                    rule.check(key, value).err().map(|detail| Violation {
                        key: key.clone(),
                        detail,
                    })
                })
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Parse rules from JSON: `{"key": [rule, ...]}` using the serde form of [`Rule`]
    pub fn from_json(value: &Value) -> Result<Self, String> {
        let Value::Object(map) = value else {
            return Err("rules must be an object".to_string());
        };
        let mut rules = Self::new();
        for (key, list) in map {
            let parsed: Vec<Rule> =
                serde_json::from_value(list.clone()).map_err(|err| format!("{}: {}", key, err))?;
            for rule in parsed {
                rules = rules.rule(key.clone(), rule);
            }
        }
        Ok(rules)
    }

    /// JSON description for tooling
    pub fn describe(&self) -> Value {
        let map: Map<String, Value> = self
            .rules
            .iter()
            .map(|(key, rules)| {
                (
                    key.clone(),
                    serde_json::to_value(rules).unwrap_or(Value::Null),
                )
            })
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(value: Value) -> Message {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_required_and_type() {
        let rules = Rules::new().require("net", ValueKind::Number);
        assert!(rules.validate(&msg(json!({"net": 10}))).is_ok());

        let errs = rules.validate(&msg(json!({"net": "10"}))).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].key, "net");

        let errs = rules.validate(&msg(json!({}))).unwrap_err();
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn test_optional_keys_checked_when_present() {
        let rules = Rules::new().rule("country", Rule::OneOf(vec![json!("US"), json!("IE")]));
        assert!(rules.validate(&msg(json!({}))).is_ok());
        assert!(rules.validate(&msg(json!({"country": "IE"}))).is_ok());
        assert!(rules.validate(&msg(json!({"country": "FR"}))).is_err());
    }

    #[test]
    fn test_bounds() {
        let rules = Rules::new().rule("n", Rule::Min(0.0)).rule("n", Rule::Max(10.0));
        assert!(rules.validate(&msg(json!({"n": 5}))).is_ok());
        assert!(rules.validate(&msg(json!({"n": -1}))).is_err());
        assert!(rules.validate(&msg(json!({"n": 11}))).is_err());
    }

    #[test]
    fn test_from_json() {
        let rules = Rules::from_json(&json!({
            "net": ["required", {"type": "number"}, {"min": 0.0}]
        }))
        .unwrap();
        assert!(rules.validate(&msg(json!({"net": 3}))).is_ok());
        assert!(rules.validate(&msg(json!({"net": -3}))).is_err());
        assert!(Rules::from_json(&json!([1])).is_err());
    }
}
