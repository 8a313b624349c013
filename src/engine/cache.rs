//! # Metric Cache
//!
//! The last-known value per input topic, with a validity deadline attached.
//! Expiry is evaluated lazily at read time: `snapshot` filters out stale
//! entries but never removes them, so the cache always holds exactly one
//! slot per configured input topic for the lifetime of the actor.

use std::collections::HashMap;

/// Last-known value for one input topic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    pub value: f64,
    /// Absolute deadline (epoch seconds) past which the value is stale.
    pub valid_till: i64,
}

impl CacheEntry {
    /// The "no data yet" entry created at configuration time.
    pub fn expired() -> Self {
        Self {
            value: 0.0,
            valid_till: 0,
        }
    }
}

/// Mapping from input topic to its most recent value and deadline.
///
/// No history is retained: updates are last-write-wins overwrites of the
/// single entry per topic.
#[derive(Debug, Default)]
pub struct MetricCache {
    entries: HashMap<String, CacheEntry>,
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create one already-expired slot per configured input topic.
    /// Duplicate topics collapse into a single slot.
    pub fn configure<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for topic in topics {
            self.entries.insert(topic.into(), CacheEntry::expired());
        }
    }

    /// Unconditional insert-or-replace of the entry keyed by `topic`.
    pub fn update(&mut self, topic: &str, value: f64, valid_till: i64) {
        self.entries
            .insert(topic.to_string(), CacheEntry { value, valid_till });
    }

    /// Project the cache into the currently-valid subset: `topic -> value`
    /// for every entry whose deadline has not passed `now`.
    ///
    /// Recomputed from scratch on every cycle; the cache size equals the
    /// configured input count, typically single digits.
    pub fn snapshot(&self, now: i64) -> HashMap<String, f64> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.valid_till >= now)
            .map(|(topic, entry)| (topic.clone(), entry.value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
