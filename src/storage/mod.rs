pub mod cache_dir;
pub mod memory;
pub mod snapshot;

pub use cache_dir::default_cache_dir;
pub use memory::MemoryStore;
pub use snapshot::{PersistedStore, SnapshotDir, SnapshotRecord};

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::PipelineResult;
use crate::persistence::ExclusionList;
use crate::pipeline::{Fingerprint, Value};

/// Where a cache entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Computed by invoking its target during this run
    Computed,
    /// Loaded from an on-disk snapshot at startup
    Snapshot,
}

/// A cached target result plus what persistence filtering needs to know
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    /// Target that produced the value
    pub target: String,
    /// False for targets registered as non-deterministic
    pub deterministic: bool,
    /// Wall time of the target call
    pub duration: Duration,
    pub created_at: DateTime<Utc>,
    pub origin: EntryOrigin,
}

impl CacheEntry {
    pub fn computed(
        value: Value,
        target: impl Into<String>,
        deterministic: bool,
        duration: Duration,
    ) -> Self {
        Self {
            value,
            target: target.into(),
            deterministic,
            duration,
            created_at: Utc::now(),
            origin: EntryOrigin::Computed,
        }
    }
}

/// Which entries a flush may write
#[derive(Debug, Clone, Default)]
pub struct FlushPolicy {
    /// Targets whose results never reach the snapshot
    pub exclude: ExclusionList,
    /// Computed entries faster than this are not worth persisting
    pub min_duration: Duration,
}

/// Outcome counts of a flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// New records written
    pub written: usize,
    /// In-memory entries filtered out (excluded, non-deterministic, too fast, unserializable)
    pub skipped: usize,
    /// In-memory entries already on disk, left untouched
    pub unchanged: usize,
    /// On-disk records not touched by this run, kept as-is
    pub preserved: usize,
    /// Records that failed to write
    pub failed: usize,
}

impl FlushSummary {
    /// Records merged with existing snapshot contents
    pub fn merged(&self) -> usize {
        self.unchanged + self.preserved
    }
}

/// Cache store backend trait
///
/// The resolver holds exactly one store for the duration of a run. There is
/// no concurrent access within a run, so `get` followed by `put` for one key
/// is never interleaved with another resolution of the same key.
pub trait CacheStore {
    /// Look up an entry
    fn get(&self, key: &Fingerprint) -> Option<&CacheEntry>;

    /// Store an entry, replacing any previous one
    fn put(&mut self, key: Fingerprint, entry: CacheEntry);

    /// Check if an entry exists
    fn contains(&self, key: &Fingerprint) -> bool;

    /// Number of entries in memory
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist entries allowed by `policy`. Process-local stores have nothing
    /// to write and return an empty summary.
    fn flush(&mut self, policy: &FlushPolicy) -> PipelineResult<FlushSummary>;
}
