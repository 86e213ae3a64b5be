//! Persistence lifecycle around one pipeline run
//!
//! The controller picks the cache store for a run (none, in-memory, or
//! snapshot-backed), hands it to the resolver, and flushes it afterwards.
//! The flush happens whether or not resolution succeeded, so results computed
//! before a failing node are kept. Persistence problems are logged as
//! warnings and never change the outcome of the run.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::PipelineResult;
use crate::logging::{operations, services, status};
use crate::pipeline::{ConfigNode, ResolveStats, Resolver, TargetRegistry, Value};
use crate::storage::{
    default_cache_dir, CacheStore, FlushPolicy, FlushSummary, MemoryStore, PersistedStore,
};

/// Target identifiers whose results never reach the snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionList(BTreeSet<String>);

impl ExclusionList {
    /// Parse a comma-separated list; whitespace is trimmed and empty items dropped
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            ids.into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, target_id: &str) -> bool {
        self.0.contains(target_id)
    }

    /// Add every id of `other`
    pub fn extend(&mut self, other: &ExclusionList) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for ExclusionList {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for ExclusionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.iter().collect();
        write!(f, "{}", ids.join(","))
    }
}

/// Effective cache settings for a run
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    /// Off means every node invokes its target
    pub caching_enabled: bool,
    /// Load from and flush to `cache_dir`
    pub persist: bool,
    pub cache_dir: PathBuf,
    pub exclude: ExclusionList,
    pub min_duration: Duration,
    pub verbose: bool,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            caching_enabled: true,
            persist: false,
            cache_dir: default_cache_dir(),
            exclude: ExclusionList::default(),
            min_duration: Duration::ZERO,
            verbose: false,
        }
    }
}

/// Result of a successful run
#[derive(Debug)]
pub struct PipelineOutcome {
    pub value: Value,
    pub stats: ResolveStats,
    /// Present when a snapshot was flushed
    pub flush: Option<FlushSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceController {
    settings: PersistenceSettings,
}

impl PersistenceController {
    pub fn new(settings: PersistenceSettings) -> Self {
        Self { settings }
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            exclude: self.settings.exclude.clone(),
            min_duration: self.settings.min_duration,
        }
    }

    /// Store for one run, or `None` when caching is disabled.
    ///
    /// If the snapshot directory cannot be opened the run falls back to an
    /// in-memory store.
    pub fn open_store(&self) -> Option<Box<dyn CacheStore>> {
        if !self.settings.caching_enabled {
            return None;
        }

        if !self.settings.persist {
            return Some(Box::new(MemoryStore::new(self.settings.verbose)));
        }

        warn!(
            service = services::PERSISTENCE,
            dir = %self.settings.cache_dir.display(),
            "cache persistence enabled: loading from and flushing to the snapshot directory"
        );
        match PersistedStore::open(
            &self.settings.cache_dir,
            &self.settings.exclude,
            self.settings.verbose,
        ) {
            Ok(store) => Some(Box::new(store)),
            Err(e) => {
                warn!(
                    service = services::PERSISTENCE,
                    operation = operations::LOAD,
                    status = status::ERROR,
                    "{}; continuing with an in-memory cache",
                    e
                );
                Some(Box::new(MemoryStore::new(self.settings.verbose)))
            }
        }
    }

    /// Flush `store` if persistence is on. Errors are logged, never returned.
    pub fn finish(&self, store: &mut dyn CacheStore) -> Option<FlushSummary> {
        if !self.settings.persist {
            return None;
        }

        match store.flush(&self.flush_policy()) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(
                    service = services::PERSISTENCE,
                    operation = operations::FLUSH,
                    status = status::ERROR,
                    "{}",
                    e
                );
                None
            }
        }
    }

    /// Resolve `root` against `registry`, then flush.
    ///
    /// The flush runs even when resolution fails; the resolution error is
    /// returned after it.
    pub fn execute(
        &self,
        root: &ConfigNode,
        registry: &TargetRegistry,
    ) -> PipelineResult<PipelineOutcome> {
        let Some(mut store) = self.open_store() else {
            let mut resolver = Resolver::without_cache(registry);
            let value = resolver.resolve(root)?;
            return Ok(PipelineOutcome {
                value,
                stats: resolver.stats(),
                flush: None,
            });
        };

        let (result, stats) = {
            let mut resolver = Resolver::new(registry, store.as_mut());
            let result = resolver.resolve(root);
            (result, resolver.stats())
        };

        if let Err(e) = &result {
            info!(
                service = services::PERSISTENCE,
                cached_entries = store.len(),
                "run failed ({}); flushing results computed so far",
                e
            );
        }
        let flush = self.finish(store.as_mut());

        result.map(|value| PipelineOutcome {
            value,
            stats,
            flush,
        })
    }
}
