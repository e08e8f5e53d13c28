//! A small in-process metric registry.
//!
//! CIF does not ship a metrics backend itself (that is an external collaborator,
//! per the ingestion framework's scope); this crate only provides the counters
//! that the core wires up internally so that a real exporter can be attached by
//! whoever embeds CIF.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop)]

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonically increasing counter of 64 bit unsigned values.
#[derive(Debug, Default)]
pub struct U64Counter(AtomicU64);

impl U64Counter {
    /// Increment this counter by `delta`.
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Read the current value of this counter.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A named, labelled instance of a metric, obtained from a [`Metric`] family.
pub type Observation = Arc<U64Counter>;

/// A family of counters, keyed by an attribute set (e.g. `source_id`, `task_name`).
///
/// Mirrors the shape of a Prometheus-style metric family: one [`Metric`] is
/// registered per *name*, and individual time series are recorded under it by
/// a set of label values.
#[derive(Debug)]
pub struct Metric<T> {
    name: &'static str,
    values: Mutex<BTreeMap<Vec<(&'static str, String)>, Arc<T>>>,
}

impl<T: Default> Metric<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the name this metric family was registered under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get or create the time series identified by `attributes`.
    pub fn recorder<const N: usize>(&self, attributes: [(&'static str, &str); N]) -> Arc<T> {
        let mut key: Vec<(&'static str, String)> = attributes
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        key.sort();
        self.values
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(T::default()))
            .clone()
    }
}

/// Holds every metric family registered by the process.
#[derive(Debug, Default)]
pub struct Registry {
    counters: Mutex<Vec<Arc<Metric<U64Counter>>>>,
}

impl Registry {
    /// Create a new, empty [`Registry`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or fetch an already-registered) counter family by name.
    pub fn register_counter(&self, name: &'static str) -> Arc<Metric<U64Counter>> {
        let mut counters = self.counters.lock();
        if let Some(existing) = counters.iter().find(|m| m.name() == name) {
            return Arc::clone(existing);
        }
        let metric = Arc::new(Metric::new(name));
        counters.push(Arc::clone(&metric));
        metric
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_per_label_set() {
        let registry = Registry::new();
        let family = registry.register_counter("cif_fragments_inserted");

        let a = family.recorder([("source_id", "aaa")]);
        let b = family.recorder([("source_id", "bbb")]);
        a.inc(3);
        a.inc(4);
        b.inc(1);

        assert_eq!(a.fetch(), 7);
        assert_eq!(b.fetch(), 1);

        // re-registering the same family returns the same underlying storage
        let same_family = registry.register_counter("cif_fragments_inserted");
        let a_again = same_family.recorder([("source_id", "aaa")]);
        assert_eq!(a_again.fetch(), 7);
    }
}
