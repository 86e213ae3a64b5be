/// Snapshot-backed cache store
///
/// Layout: one `<fingerprint>.json` record per cache entry inside the cache
/// directory. Records are written through a temp file in the same directory
/// and renamed into place, so a crashed flush never leaves a half-written
/// record behind.
///
/// Loading never fails on bad records: anything unreadable, corrupt or
/// inconsistent with its file name is logged and skipped.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::memory::MemoryStore;
use super::{CacheEntry, CacheStore, EntryOrigin, FlushPolicy, FlushSummary};
use crate::error::{PipelineError, PipelineResult};
use crate::logging::{operations, services, status};
use crate::persistence::ExclusionList;
use crate::pipeline::{Fingerprint, Value};

pub const RECORD_VERSION: u32 = 1;
const RECORD_EXTENSION: &str = "json";

/// On-disk form of one cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub version: u32,
    pub fingerprint: String,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub value: Value,
}

impl SnapshotRecord {
    fn from_entry(key: &Fingerprint, entry: &CacheEntry) -> Self {
        Self {
            version: RECORD_VERSION,
            fingerprint: key.to_string(),
            target: entry.target.clone(),
            created_at: entry.created_at,
            duration_ms: entry.duration.as_millis() as u64,
            value: entry.value.clone(),
        }
    }

    fn into_entry(self) -> CacheEntry {
        CacheEntry {
            value: self.value,
            target: self.target,
            deterministic: true,
            duration: Duration::from_millis(self.duration_ms),
            created_at: self.created_at,
            origin: EntryOrigin::Snapshot,
        }
    }
}

/// Read-side view of a snapshot directory
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    dir: PathBuf,
}

/// Snapshot statistics
#[derive(Debug, Clone, Default)]
pub struct SnapshotStats {
    pub total_records: usize,
    pub total_bytes: u64,
    pub corrupt_records: usize,
    pub per_target: BTreeMap<String, usize>,
}

impl SnapshotDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.{}", key, RECORD_EXTENSION))
    }

    /// Paths of every `*.json` file; a missing directory has none
    pub fn record_paths(&self) -> PipelineResult<Vec<PathBuf>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PipelineError::Snapshot {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut paths = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| PipelineError::Snapshot {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
            {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Every readable record; unreadable ones are logged and left out
    pub fn records(&self) -> PipelineResult<Vec<(PathBuf, SnapshotRecord)>> {
        let mut records = Vec::new();
        for path in self.record_paths()? {
            match read_record(&path) {
                Ok(record) => records.push((path, record)),
                Err(e) => warn!("{}", e),
            }
        }
        Ok(records)
    }

    pub fn stats(&self) -> PipelineResult<SnapshotStats> {
        let mut stats = SnapshotStats::default();
        for path in self.record_paths()? {
            match read_record(&path) {
                Ok(record) => {
                    stats.total_records += 1;
                    stats.total_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    *stats.per_target.entry(record.target).or_default() += 1;
                }
                Err(_) => stats.corrupt_records += 1,
            }
        }
        Ok(stats)
    }

    /// Delete records, optionally only those produced by `target`.
    /// Returns the number of removed records.
    pub fn clean(&self, target: Option<&str>) -> PipelineResult<usize> {
        let mut removed = 0;
        for path in self.record_paths()? {
            if let Some(target) = target {
                match read_record(&path) {
                    Ok(record) if record.target == target => {}
                    _ => continue,
                }
            }
            fs::remove_file(&path).map_err(|source| PipelineError::Snapshot {
                path: path.clone(),
                source,
            })?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Read and validate one record file
pub fn read_record(path: &Path) -> PipelineResult<SnapshotRecord> {
    let load_error = |reason: String| PipelineError::CacheLoad {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| load_error(e.to_string()))?;
    let record: SnapshotRecord =
        serde_json::from_slice(&bytes).map_err(|e| load_error(format!("corrupt record: {}", e)))?;

    if record.version != RECORD_VERSION {
        return Err(load_error(format!(
            "unsupported record version {} (expected {})",
            record.version, RECORD_VERSION
        )));
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    if record.fingerprint != stem || Fingerprint::parse(stem).is_none() {
        return Err(load_error(format!(
            "fingerprint {} does not match file name",
            record.fingerprint
        )));
    }

    Ok(record)
}

/// Counts from loading a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub excluded: usize,
    pub corrupt: usize,
}

/// Cache store that starts from an on-disk snapshot and merges back into it
#[derive(Debug)]
pub struct PersistedStore {
    memory: MemoryStore,
    snapshot: SnapshotDir,
    /// Fingerprints with a record on disk
    on_disk: HashSet<Fingerprint>,
    load_summary: LoadSummary,
}

impl PersistedStore {
    /// Create the cache directory if needed and load every usable record.
    ///
    /// Records produced by targets in `exclude` are not loaded.
    pub fn open(
        dir: impl Into<PathBuf>,
        exclude: &ExclusionList,
        verbose: bool,
    ) -> PipelineResult<Self> {
        let snapshot = SnapshotDir::new(dir);
        fs::create_dir_all(snapshot.path()).map_err(|source| PipelineError::Snapshot {
            path: snapshot.path().to_path_buf(),
            source,
        })?;

        let mut store = Self {
            memory: MemoryStore::new(verbose),
            snapshot,
            on_disk: HashSet::new(),
            load_summary: LoadSummary::default(),
        };
        store.load(exclude)?;
        Ok(store)
    }

    fn load(&mut self, exclude: &ExclusionList) -> PipelineResult<()> {
        let paths = self.snapshot.record_paths()?;
        let verbose = self.memory.is_verbose();
        if verbose {
            info!(
                service = services::CACHE_SNAPSHOT,
                operation = operations::LOAD,
                file_count = paths.len(),
                dir = %self.snapshot.path().display(),
                "loading cache snapshot"
            );
        }

        let mut summary = LoadSummary::default();
        for path in paths {
            let record = match read_record(&path) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        service = services::CACHE_SNAPSHOT,
                        operation = operations::LOAD,
                        status = status::ERROR,
                        "{}; skipping",
                        e
                    );
                    summary.corrupt += 1;
                    continue;
                }
            };

            // Validated by read_record
            let Some(key) = Fingerprint::parse(&record.fingerprint) else {
                continue;
            };
            self.on_disk.insert(key.clone());

            if exclude.contains(&record.target) {
                if verbose {
                    info!(
                        service = services::CACHE_SNAPSHOT,
                        operation = operations::LOAD,
                        status = status::SKIPPED,
                        fingerprint = key.short(),
                        target_id = %record.target,
                        "not loading record of excluded target"
                    );
                }
                summary.excluded += 1;
                continue;
            }

            self.memory.put(key, record.into_entry());
            summary.loaded += 1;
        }

        info!(
            service = services::CACHE_SNAPSHOT,
            operation = operations::LOAD,
            loaded = summary.loaded,
            excluded = summary.excluded,
            corrupt = summary.corrupt,
            "loaded {} entries into the cache",
            summary.loaded
        );
        self.load_summary = summary;
        Ok(())
    }

    pub fn load_summary(&self) -> LoadSummary {
        self.load_summary
    }

    fn skip_reason(entry: &CacheEntry, policy: &FlushPolicy) -> Option<String> {
        if !entry.deterministic {
            return Some("target is not deterministic".to_string());
        }
        if policy.exclude.contains(&entry.target) {
            return Some("target is excluded from persistence".to_string());
        }
        if entry.origin == EntryOrigin::Computed && entry.duration < policy.min_duration {
            return Some(format!(
                "target took {:?}, less than {:?}",
                entry.duration, policy.min_duration
            ));
        }
        entry.value.unpersistable_reason()
    }

    fn write_record(&self, path: &Path, record: &SnapshotRecord) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut tmp = NamedTempFile::new_in(self.snapshot.path())?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl CacheStore for PersistedStore {
    fn get(&self, key: &Fingerprint) -> Option<&CacheEntry> {
        self.memory.get(key)
    }

    fn put(&mut self, key: Fingerprint, entry: CacheEntry) {
        self.memory.put(key, entry)
    }

    fn contains(&self, key: &Fingerprint) -> bool {
        self.memory.contains(key)
    }

    fn len(&self) -> usize {
        self.memory.len()
    }

    fn flush(&mut self, policy: &FlushPolicy) -> PipelineResult<FlushSummary> {
        let dir = self.snapshot.path().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| PipelineError::CacheFlush {
            path: dir.clone(),
            source,
        })?;

        let verbose = self.memory.is_verbose();
        let mut summary = FlushSummary::default();
        let mut newly_written = Vec::new();

        for (key, entry) in self.memory.iter_sorted() {
            if let Some(reason) = Self::skip_reason(entry, policy) {
                if verbose {
                    info!(
                        service = services::CACHE_SNAPSHOT,
                        operation = operations::FLUSH,
                        status = status::SKIPPED,
                        fingerprint = key.short(),
                        target_id = %entry.target,
                        "not persisting entry: {}",
                        reason
                    );
                }
                summary.skipped += 1;
                continue;
            }

            let path = self.snapshot.record_path(key);
            // Existing records keep their original creation time
            if self.on_disk.contains(key) {
                summary.unchanged += 1;
                continue;
            }
            // Written by another run since load; a record that fails
            // validation is replaced
            if path.exists() && read_record(&path).is_ok() {
                newly_written.push(key.clone());
                summary.unchanged += 1;
                continue;
            }

            match self.write_record(&path, &SnapshotRecord::from_entry(key, entry)) {
                Ok(()) => {
                    debug!(
                        service = services::CACHE_SNAPSHOT,
                        operation = operations::FLUSH,
                        status = status::SUCCESS,
                        fingerprint = key.short(),
                        target_id = %entry.target,
                        "wrote cache record"
                    );
                    newly_written.push(key.clone());
                    summary.written += 1;
                }
                Err(e) => {
                    warn!(
                        service = services::CACHE_SNAPSHOT,
                        operation = operations::FLUSH,
                        status = status::ERROR,
                        fingerprint = key.short(),
                        "failed to write {}: {}",
                        path.display(),
                        e
                    );
                    summary.failed += 1;
                }
            }
        }

        summary.preserved = self
            .on_disk
            .iter()
            .filter(|key| !self.memory.contains(key))
            .count();
        self.on_disk.extend(newly_written);

        info!(
            service = services::CACHE_SNAPSHOT,
            operation = operations::FLUSH,
            written = summary.written,
            skipped = summary.skipped,
            merged = summary.merged(),
            failed = summary.failed,
            "dumped {} out of {} entries to {}",
            summary.written,
            self.memory.len(),
            dir.display()
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{fingerprint, Arguments, CallMode};
    use tempfile::TempDir;

    fn key(n: i64) -> Fingerprint {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("n".to_string(), Value::Int(n));
        fingerprint("t", CallMode::Keyword, &Arguments::new(Vec::new(), kwargs)).unwrap()
    }

    fn entry(target: &str, value: Value) -> CacheEntry {
        CacheEntry::computed(value, target, true, Duration::from_millis(5))
    }

    #[test]
    fn test_missing_directory_starts_empty() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("does/not/exist");

        let store = PersistedStore::open(&dir, &ExclusionList::default(), false).unwrap();
        assert!(store.is_empty());
        assert!(dir.exists());
        assert_eq!(store.load_summary(), LoadSummary::default());
    }

    #[test]
    fn test_flush_then_reload() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("cache");

        let mut store = PersistedStore::open(&dir, &ExclusionList::default(), false).unwrap();
        store.put(key(1), entry("a", Value::Int(1)));
        store.put(key(2), entry("b", Value::from("two")));

        let summary = store.flush(&FlushPolicy::default()).unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, 0);

        let reloaded = PersistedStore::open(&dir, &ExclusionList::default(), false).unwrap();
        assert_eq!(reloaded.len(), 2);
        let e = reloaded.get(&key(2)).unwrap();
        assert_eq!(e.value, Value::from("two"));
        assert_eq!(e.target, "b");
        assert_eq!(e.origin, EntryOrigin::Snapshot);
    }

    #[test]
    fn test_flush_skips_excluded_non_deterministic_and_opaque() {
        let temp = TempDir::new().unwrap();
        let mut store =
            PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();

        store.put(key(1), entry("keep", Value::Int(1)));
        store.put(key(2), entry("huge", Value::Int(2)));
        store.put(
            key(3),
            CacheEntry::computed(Value::Int(3), "clock", false, Duration::ZERO),
        );
        store.put(key(4), entry("model", Value::opaque(42u32)));

        let policy = FlushPolicy {
            exclude: ExclusionList::parse("huge"),
            min_duration: Duration::ZERO,
        };
        let summary = store.flush(&policy).unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(summary.skipped, 3);

        let records = SnapshotDir::new(temp.path()).records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.target, "keep");
    }

    #[test]
    fn test_flush_respects_min_duration() {
        let temp = TempDir::new().unwrap();
        let mut store =
            PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();
        store.put(key(1), entry("fast", Value::Int(1)));

        let policy = FlushPolicy {
            exclude: ExclusionList::default(),
            min_duration: Duration::from_secs(1),
        };
        let summary = store.flush(&policy).unwrap();
        assert_eq!(summary.written, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_flush_merges_with_existing_records() {
        let temp = TempDir::new().unwrap();

        let mut first = PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();
        first.put(key(1), entry("a", Value::Int(1)));
        first.put(key(2), entry("b", Value::Int(2)));
        first.flush(&FlushPolicy::default()).unwrap();

        // A second store that excludes "b" on load, then computes something new
        let mut second = PersistedStore::open(temp.path(), &ExclusionList::parse("b"), false).unwrap();
        assert_eq!(second.load_summary().excluded, 1);
        second.put(key(3), entry("c", Value::Int(3)));

        let summary = second.flush(&FlushPolicy::default()).unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.preserved, 1);
        assert_eq!(summary.merged(), 2);

        // Nothing was deleted
        assert_eq!(SnapshotDir::new(temp.path()).record_paths().unwrap().len(), 3);
    }

    #[test]
    fn test_corrupt_records_are_skipped_on_load() {
        let temp = TempDir::new().unwrap();
        let mut store = PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();
        store.put(key(1), entry("a", Value::Int(1)));
        store.flush(&FlushPolicy::default()).unwrap();

        // Garbage, a mismatched name and a foreign file
        fs::write(temp.path().join(format!("{}.json", key(2))), b"{not json").unwrap();
        let good = fs::read(SnapshotDir::new(temp.path()).record_path(&key(1))).unwrap();
        fs::write(temp.path().join(format!("{}.json", key(3))), good).unwrap();
        fs::write(temp.path().join("README.txt"), b"hello").unwrap();

        let reloaded = PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&key(1)));
        assert_eq!(reloaded.load_summary().corrupt, 2);
    }

    #[test]
    fn test_corrupt_record_is_replaced_on_flush() {
        let temp = TempDir::new().unwrap();
        let path = SnapshotDir::new(temp.path()).record_path(&key(1));
        fs::write(&path, b"{truncated").unwrap();

        let mut store = PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();
        assert!(!store.contains(&key(1)));
        assert_eq!(store.load_summary().corrupt, 1);

        store.put(key(1), entry("a", Value::Int(7)));
        let summary = store.flush(&FlushPolicy::default()).unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(summary.unchanged, 0);
        assert_eq!(read_record(&path).unwrap().value, Value::Int(7));

        let reloaded = PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();
        assert_eq!(reloaded.get(&key(1)).unwrap().value, Value::Int(7));
        assert_eq!(reloaded.load_summary().corrupt, 0);
    }

    #[test]
    fn test_flush_keeps_record_written_by_another_run() {
        let temp = TempDir::new().unwrap();
        let mut stale = PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();

        let mut other = PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();
        other.put(key(1), entry("a", Value::Int(1)));
        other.flush(&FlushPolicy::default()).unwrap();
        let path = SnapshotDir::new(temp.path()).record_path(&key(1));
        let original = read_record(&path).unwrap().created_at;

        stale.put(key(1), entry("a", Value::Int(1)));
        let summary = stale.flush(&FlushPolicy::default()).unwrap();
        assert_eq!(summary.written, 0);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(read_record(&path).unwrap().created_at, original);
    }

    #[test]
    fn test_flush_fails_when_directory_is_replaced() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("cache");
        let mut store = PersistedStore::open(&dir, &ExclusionList::default(), false).unwrap();
        store.put(key(1), entry("a", Value::Int(1)));

        fs::remove_dir_all(&dir).unwrap();
        fs::write(&dir, b"not a directory").unwrap();

        let err = store.flush(&FlushPolicy::default()).unwrap_err();
        assert!(matches!(err, PipelineError::CacheFlush { ref path, .. } if path == &dir));
    }

    #[test]
    fn test_flush_counts_records_that_cannot_be_written() {
        let temp = TempDir::new().unwrap();
        let mut store = PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();
        store.put(key(1), entry("a", Value::Int(1)));
        store.put(key(2), entry("b", Value::Int(2)));

        // A directory squatting on the record path cannot be renamed over
        fs::create_dir(SnapshotDir::new(temp.path()).record_path(&key(1))).unwrap();

        let summary = store.flush(&FlushPolicy::default()).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.written, 1);
    }

    #[test]
    fn test_snapshot_dir_stats_and_clean() {
        let temp = TempDir::new().unwrap();
        let mut store = PersistedStore::open(temp.path(), &ExclusionList::default(), false).unwrap();
        store.put(key(1), entry("a", Value::Int(1)));
        store.put(key(2), entry("a", Value::Int(2)));
        store.put(key(3), entry("b", Value::Int(3)));
        store.flush(&FlushPolicy::default()).unwrap();

        let snapshot = SnapshotDir::new(temp.path());
        let stats = snapshot.stats().unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.per_target["a"], 2);
        assert!(stats.total_bytes > 0);

        assert_eq!(snapshot.clean(Some("a")).unwrap(), 2);
        assert_eq!(snapshot.record_paths().unwrap().len(), 1);
        assert_eq!(snapshot.clean(None).unwrap(), 1);
        assert!(snapshot.records().unwrap().is_empty());
    }
}
