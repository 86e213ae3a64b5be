use std::collections::HashMap;
use tracing::{debug, info};

use super::{CacheEntry, CacheStore, FlushPolicy, FlushSummary};
use crate::error::PipelineResult;
use crate::logging::{operations, services, status};
use crate::pipeline::Fingerprint;

/// Process-local cache store, discarded when the process exits
///
/// With `verbose` set, every lookup and insertion is logged at info level
/// instead of debug.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<Fingerprint, CacheEntry>,
    verbose: bool,
}

impl MemoryStore {
    pub fn new(verbose: bool) -> Self {
        Self {
            entries: HashMap::new(),
            verbose,
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Entries sorted by fingerprint
    pub fn iter_sorted(&self) -> Vec<(&Fingerprint, &CacheEntry)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &Fingerprint) -> Option<&CacheEntry> {
        let entry = self.entries.get(key);
        let lookup = if entry.is_some() {
            status::HIT
        } else {
            status::MISS
        };
        let target = entry.map(|e| e.target.as_str()).unwrap_or("");

        if self.verbose {
            info!(
                service = services::CACHE_MEMORY,
                operation = operations::GET,
                status = lookup,
                fingerprint = key.short(),
                target_id = target,
                "cache lookup"
            );
        } else {
            debug!(
                service = services::CACHE_MEMORY,
                operation = operations::GET,
                status = lookup,
                fingerprint = key.short(),
                target_id = target,
                "cache lookup"
            );
        }

        entry
    }

    fn put(&mut self, key: Fingerprint, entry: CacheEntry) {
        if self.verbose {
            info!(
                service = services::CACHE_MEMORY,
                operation = operations::PUT,
                fingerprint = key.short(),
                target_id = %entry.target,
                duration_ms = entry.duration.as_millis() as u64,
                "add to cache"
            );
        }
        self.entries.insert(key, entry);
    }

    fn contains(&self, key: &Fingerprint) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn flush(&mut self, _policy: &FlushPolicy) -> PipelineResult<FlushSummary> {
        debug!(
            service = services::CACHE_MEMORY,
            operation = operations::FLUSH,
            entry_count = self.entries.len(),
            "in-memory cache has no snapshot to flush"
        );
        Ok(FlushSummary::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{fingerprint, Arguments, CallMode, Value};
    use std::time::Duration;

    fn key(target: &str) -> Fingerprint {
        fingerprint(target, CallMode::Keyword, &Arguments::default()).unwrap()
    }

    #[test]
    fn test_memory_store_put_and_get() {
        let mut store = MemoryStore::new(false);
        let k = key("pkg::f");

        assert!(store.get(&k).is_none());
        assert!(!store.contains(&k));
        assert!(store.is_empty());

        store.put(
            k.clone(),
            CacheEntry::computed(Value::Int(7), "pkg::f", true, Duration::from_millis(3)),
        );

        assert!(store.contains(&k));
        assert_eq!(store.len(), 1);
        let entry = store.get(&k).unwrap();
        assert_eq!(entry.value, Value::Int(7));
        assert_eq!(entry.target, "pkg::f");
    }

    #[test]
    fn test_memory_store_flush_is_noop() {
        let mut store = MemoryStore::new(true);
        store.put(
            key("t"),
            CacheEntry::computed(Value::Null, "t", true, Duration::ZERO),
        );

        let summary = store.flush(&FlushPolicy::default()).unwrap();
        assert_eq!(summary, FlushSummary::default());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_iter_sorted_orders_by_fingerprint() {
        let mut store = MemoryStore::new(false);
        for t in ["a", "b", "c", "d"] {
            store.put(
                key(t),
                CacheEntry::computed(Value::Null, t, true, Duration::ZERO),
            );
        }
        let keys: Vec<_> = store.iter_sorted().into_iter().map(|(k, _)| k.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
