//! Pattern index: the registry of live action definitions
//!
//! The index is held as an immutable snapshot behind a lock. Registration
//! clones the snapshot, applies the change and swaps the pointer, so a
//! concurrent `resolve` always sees either the whole old index or the whole
//! new one.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::action::ActionDefinition;
use super::message::Message;
use super::pattern::Pattern;

/// Immutable view of the index at one point in time
#[derive(Clone, Default)]
pub struct IndexSnapshot {
    /// Live definitions by canonical pattern
    live: BTreeMap<String, Arc<ActionDefinition>>,
    /// Live definitions, most specific first, newest first among equals
    ranked: Vec<Arc<ActionDefinition>>,
    /// Live definitions in canonical order
    sorted: Vec<Arc<ActionDefinition>>,
}

impl IndexSnapshot {
    fn insert(&mut self, definition: Arc<ActionDefinition>) {
        let canonical = definition.canonical().to_string();
        self.ranked.retain(|def| def.canonical() != canonical);

        let specificity = definition.pattern().specificity();
        let position = self
            .ranked
            .iter()
            .position(|def| def.pattern().specificity() <= specificity)
            .unwrap_or(self.ranked.len());
        self.ranked.insert(position, definition.clone());

        self.live.insert(canonical, definition);
        self.sorted = self.live.values().cloned().collect();
    }

    /// Best match for a message
    pub fn resolve(&self, message: &Message) -> Option<&Arc<ActionDefinition>> {
        // `ranked` is ordered so the first hit is the most specific, most recent match
        self.ranked.iter().find(|def| def.pattern().matches(message))
    }

    /// Live definition for an exact canonical pattern
    pub fn get(&self, canonical: &str) -> Option<&Arc<ActionDefinition>> {
        self.live.get(canonical)
    }

    /// Number of live definitions
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Registry of action definitions keyed by canonical pattern
#[derive(Default)]
pub struct PatternIndex {
    current: RwLock<Arc<IndexSnapshot>>,
    seq: AtomicU64,
}

impl PatternIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Next registration sequence number
    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    /// Publish a definition.
    ///
    /// An existing live definition with the same canonical pattern becomes the
    /// new definition's `prior`, and the new definition replaces it.
    pub fn register(&self, mut definition: ActionDefinition) -> Arc<ActionDefinition> {
        let mut current = self.current.write();
        let mut next = IndexSnapshot::clone(&current);

        definition.prior = next.get(definition.canonical()).cloned();
        let definition = Arc::new(definition);
        next.insert(definition.clone());

        *current = Arc::new(next);
        definition
    }

    /// Most specific live definition matching the message
    pub fn resolve(&self, message: &Message) -> Option<Arc<ActionDefinition>> {
        self.snapshot().resolve(message).cloned()
    }

    /// Live definition registered at exactly this pattern
    pub fn find(&self, pattern: &Pattern) -> Option<Arc<ActionDefinition>> {
        self.snapshot().get(pattern.canonical()).cloned()
    }

    /// Lazy listing of live definitions covering an optional partial query
    pub fn list(&self, query: Option<Pattern>) -> ListIter {
        ListIter {
            snapshot: self.snapshot(),
            query,
            next: 0,
        }
    }

    /// A live pattern that a new pattern would be ambiguous with: same
    /// specificity, different canonical form, and some message matching both
    pub fn ambiguous_with(&self, pattern: &Pattern) -> Option<String> {
        let specificity = pattern.specificity();
        self.snapshot()
            .ranked
            .iter()
            .find(|def| {
                def.canonical() != pattern.canonical()
                    && def.pattern().specificity() == specificity
                    && def.pattern().overlaps(pattern)
            })
            .map(|def| def.canonical().to_string())
    }

    /// Number of live definitions
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Finite, restartable iterator over a snapshot of live definitions
#[derive(Clone)]
pub struct ListIter {
    snapshot: Arc<IndexSnapshot>,
    query: Option<Pattern>,
    next: usize,
}

impl ListIter {
    /// Start over from the first definition of the same snapshot
    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl Iterator for ListIter {
    type Item = Arc<ActionDefinition>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(def) = self.snapshot.sorted.get(self.next) {
            self.next += 1;
            let wanted = self
                .query
                .as_ref()
                .is_none_or(|query| def.pattern().covers(query));
            if wanted {
                return Some(def.clone());
            }
        }
        None
    }
}
