//! Per-pattern stats accounting

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::ActErrorKind;

/// Pattern name recorded for acts that never resolved
pub const UNMATCHED: &str = "<unmatched>";

/// Counters for one pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    /// Total completed invocations
    pub calls: u64,
    /// Successful invocations
    pub done: u64,
    /// Failed invocations
    pub fails: u64,
    /// Failures that were timeouts
    pub timeouts: u64,
    /// Results served from the replay cache
    pub replays: u64,
    /// Summed latency in milliseconds
    pub total_ms: u64,
    /// Worst latency in milliseconds
    pub max_ms: u64,
    /// Completion time of the last invocation
    pub last_at: Option<DateTime<Utc>>,
}

impl PatternStats {
    /// Mean latency in milliseconds
    pub fn mean_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.calls as f64
        }
    }
}

/// Aggregate view returned by `Runtime::stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    /// When accounting started
    pub started: DateTime<Utc>,
    /// Total completed invocations
    pub calls: u64,
    /// Successful invocations
    pub done: u64,
    /// Failed invocations
    pub fails: u64,
    /// Per-pattern counters keyed by canonical pattern
    pub patterns: BTreeMap<String, PatternStats>,
}

/// Stats collector shared by every dispatch of a runtime
#[derive(Debug)]
pub struct Stats {
    started: DateTime<Utc>,
    patterns: Mutex<BTreeMap<String, PatternStats>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            started: Utc::now(),
            patterns: Mutex::new(BTreeMap::new()),
        }
    }

    /// Account one completed invocation
    pub fn record(&self, pattern: &str, elapsed_ms: u64, failure: Option<ActErrorKind>, replayed: bool) {
        let mut patterns = self.patterns.lock();
        let entry = patterns.entry(pattern.to_string()).or_default();
        entry.calls += 1;
        entry.total_ms += elapsed_ms;
        entry.max_ms = entry.max_ms.max(elapsed_ms);
        entry.last_at = Some(Utc::now());
        if replayed {
            entry.replays += 1;
        }
        match failure {
            None => entry.done += 1,
            Some(kind) => {
                entry.fails += 1;
                if kind == ActErrorKind::Timeout {
                    entry.timeouts += 1;
                }
            }
        }
    }

    /// Counters for one canonical pattern
    pub fn get(&self, pattern: &str) -> Option<PatternStats> {
        self.patterns.lock().get(pattern).cloned()
    }

    /// Snapshot of every counter
    pub fn report(&self) -> StatsReport {
        let patterns = self.patterns.lock().clone();
        let (calls, done, fails) = patterns.values().fold((0, 0, 0), |acc, stats| {
            (acc.0 + stats.calls, acc.1 + stats.done, acc.2 + stats.fails)
        });
        StatsReport {
            started: self.started,
            calls,
            done,
            fails,
            patterns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_report() {
        let stats = Stats::new();
        stats.record("a:1", 10, None, false);
        stats.record("a:1", 30, Some(ActErrorKind::Timeout), false);
        stats.record(UNMATCHED, 1, Some(ActErrorKind::NotFound), false);

        let a = stats.get("a:1").unwrap();
        assert_eq!(a.calls, 2);
        assert_eq!(a.done, 1);
        assert_eq!(a.timeouts, 1);
        assert_eq!(a.max_ms, 30);
        assert_eq!(a.mean_ms(), 20.0);

        let report = stats.report();
        assert_eq!(report.calls, 3);
        assert_eq!(report.fails, 2);
        assert_eq!(report.patterns.len(), 2);
    }
}
