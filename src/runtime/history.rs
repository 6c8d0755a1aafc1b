//! Replay cache for caller-identified acts
//!
//! Results of acts carrying an `id$` are kept under the message fingerprint so
//! that a retried call returns the original result without running the
//! handler again. Capacity-bounded; the oldest entry is evicted first.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct Entries {
    values: HashMap<String, Value>,
    order: VecDeque<String>,
}

/// Bounded fingerprint-to-result cache
#[derive(Debug)]
pub struct History {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl History {
    /// Create a cache holding at most `capacity` results; zero disables it
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Whether caching is on
    pub fn enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Cached result for a fingerprint
    pub fn get(&self, fingerprint: &str) -> Option<Value> {
        self.entries.lock().values.get(fingerprint).cloned()
    }

    /// Store a result, evicting the oldest entries beyond capacity
    pub fn insert(&self, fingerprint: String, value: Value) {
        if !self.enabled() {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.values.insert(fingerprint.clone(), value).is_none() {
            entries.order.push_back(fingerprint);
        }
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.values.remove(&oldest);
            }
        }
    }

    /// Number of cached results
    pub fn len(&self) -> usize {
        self.entries.lock().values.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evicts_oldest() {
        let history = History::new(2);
        history.insert("a".into(), json!(1));
        history.insert("b".into(), json!(2));
        history.insert("a".into(), json!(10));
        history.insert("c".into(), json!(3));

        assert_eq!(history.len(), 2);
        assert!(history.get("a").is_none());
        assert_eq!(history.get("b"), Some(json!(2)));
        assert_eq!(history.get("c"), Some(json!(3)));
    }

    #[test]
    fn test_zero_capacity_disables() {
        let history = History::new(0);
        history.insert("a".into(), json!(1));
        assert!(history.is_empty());
    }
}
