//! Metric reporting.
//!
//! The index reports a handful of gauges (recall, realtime contribution)
//! through a [`MetricsSink`]. Every report carries a tag set built from the
//! index's static identity tags merged with caller-supplied tags; a
//! [`TagCache`] builds each distinct tag set once.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::info;

/// Tag name to value, ordered by name.
pub type MetricTags = BTreeMap<String, String>;

/// Receives metric values.
pub trait MetricsSink: Send + Sync + Debug {
    fn report(&self, name: &str, value: f64, tags: &MetricTags);
}

/// Writes metrics as `tracing` events on the `vecseg::metrics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn report(&self, name: &str, value: f64, tags: &MetricTags) {
        info!(target: "vecseg::metrics", metric = name, value, tags = ?tags);
    }
}

/// One reported value.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub tags: MetricTags,
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct MemoryMetricsSink {
    records: Mutex<Vec<MetricRecord>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        MemoryMetricsSink::default()
    }

    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().clone()
    }

    /// Values reported under `name`, oldest first.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.name == name)
            .map(|record| record.value)
            .collect()
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn report(&self, name: &str, value: f64, tags: &MetricTags) {
        self.records.lock().push(MetricRecord {
            name: name.to_string(),
            value,
            tags: tags.clone(),
        });
    }
}

/// Builds merged tag sets and remembers them.
#[derive(Debug, Default)]
pub struct TagCache {
    static_tags: MetricTags,
    cache: RwLock<AHashMap<Vec<(String, String)>, Arc<MetricTags>>>,
}

impl TagCache {
    pub fn new(static_tags: MetricTags) -> Self {
        TagCache {
            static_tags,
            cache: RwLock::new(AHashMap::new()),
        }
    }

    pub fn static_tags(&self) -> &MetricTags {
        &self.static_tags
    }

    /// Static tags overlaid with `dynamic`. A dynamic tag wins on a name clash.
    pub fn tags(&self, dynamic: &[(String, String)]) -> Arc<MetricTags> {
        let mut key = dynamic.to_vec();
        key.sort();
        if let Some(tags) = self.cache.read().get(&key) {
            return Arc::clone(tags);
        }

        let mut merged = self.static_tags.clone();
        merged.extend(key.iter().cloned());
        let mut cache = self.cache.write();
        Arc::clone(cache.entry(key).or_insert_with(|| Arc::new(merged)))
    }

    /// Number of distinct tag sets built so far.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn test_tags_are_merged_and_cached() {
        let cache = TagCache::new(MetricTags::from([pair("index", "docs"), pair("role", "leaf")]));
        let a = cache.tags(&[pair("role", "root"), pair("tenant", "t1")]);
        let b = cache.tags(&[pair("tenant", "t1"), pair("role", "root")]);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(a.get("index").map(String::as_str), Some("docs"));
        assert_eq!(a.get("role").map(String::as_str), Some("root"));

        let plain = cache.tags(&[]);
        assert_eq!(*plain, *cache.static_tags());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryMetricsSink::new();
        sink.report("recall", 0.5, &MetricTags::new());
        sink.report("other", 1.0, &MetricTags::new());
        sink.report("recall", 1.0, &MetricTags::new());
        assert_eq!(sink.values("recall"), vec![0.5, 1.0]);
        assert_eq!(sink.records().len(), 3);
        LogMetricsSink.report("recall", 1.0, &MetricTags::new());
    }
}
