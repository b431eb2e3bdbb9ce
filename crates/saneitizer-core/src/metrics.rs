//! Labeled counters for drift volume.
//!
//! Counters are created on first use rather than declared up front, because
//! the label sets (cluster names, problem kinds) differ between deployments.
//! Every counter is an atomic, so increments from concurrent scan workers are
//! safe without locks; only counter creation takes the registry lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Name of the counter family incremented by the checker.
pub const SANITIZATION_COUNTER: &str = "sanitization_total";

/// Minimal counter contract consumed by the Counting remediator.
pub trait CounterHandle: Send + Sync {
    fn increment(&self);
}

/// Factory producing the counter for one remediation method name.
pub type CounterFactory = Arc<dyn Fn(&str) -> Arc<dyn CounterHandle> + Send + Sync>;

/// A single monotonically increasing counter.
#[derive(Debug, Default)]
pub struct LabeledCounter {
    value: AtomicU64,
}

impl LabeledCounter {
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl CounterHandle for LabeledCounter {
    fn increment(&self) {
        self.add(1);
    }
}

/// Identity of a counter: family name plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl CounterKey {
    pub fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

/// Registry of lazily created labeled counters.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: Mutex<BTreeMap<CounterKey, Arc<LabeledCounter>>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter for `name` with `labels` (label order is irrelevant).
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Arc<LabeledCounter> {
        let key = CounterKey::new(name, labels);
        Arc::clone(self.counters.lock().entry(key).or_default())
    }

    /// Current value, or 0 for a counter that was never created.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = CounterKey::new(name, labels);
        self.counters.lock().get(&key).map_or(0, |c| c.get())
    }

    /// Sum over every counter of the family whose labels include `filter`.
    pub fn sum(&self, name: &str, filter: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|(key, _)| key.name == name)
            .filter(|(key, _)| {
                filter
                    .iter()
                    .all(|(k, v)| key.labels.iter().any(|(lk, lv)| lk == k && lv == v))
            })
            .map(|(_, counter)| counter.get())
            .sum()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            counters: self
                .counters
                .lock()
                .iter()
                .map(|(key, counter)| (key.clone(), counter.get()))
                .collect(),
        }
    }
}

/// Point-in-time copy of every counter, suitable for JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub counters: Vec<(CounterKey, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_shared_across_lookups() {
        let registry = CounterRegistry::new();
        let a = registry.counter("x", &[("problem", "p"), ("cluster", "c1")]);
        let b = registry.counter("x", &[("cluster", "c1"), ("problem", "p")]);
        a.increment();
        b.increment();
        assert_eq!(registry.value("x", &[("problem", "p"), ("cluster", "c1")]), 2);
        assert_eq!(registry.snapshot().counters.len(), 1);
    }

    #[test]
    fn unknown_counter_reads_zero() {
        let registry = CounterRegistry::new();
        assert_eq!(registry.value("missing", &[]), 0);
    }

    #[test]
    fn sum_filters_by_label_subset() {
        let registry = CounterRegistry::new();
        registry.counter("x", &[("action", "fixed"), ("cluster", "a")]).add(3);
        registry.counter("x", &[("action", "fixed"), ("cluster", "b")]).add(4);
        registry.counter("x", &[("action", "checked"), ("cluster", "a")]).add(10);
        registry.counter("y", &[("action", "fixed")]).add(100);
        assert_eq!(registry.sum("x", &[("action", "fixed")]), 7);
        assert_eq!(registry.sum("x", &[("cluster", "a")]), 13);
        assert_eq!(registry.sum("x", &[]), 17);
    }

    #[test]
    fn concurrent_increments_are_counted() {
        let registry = Arc::new(CounterRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.counter("hits", &[]).increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.value("hits", &[]), 4000);
    }
}
