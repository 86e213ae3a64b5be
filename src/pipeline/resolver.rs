/// Bottom-up resolution of a config graph
///
/// Children are resolved before their parent, so a parent's fingerprint is
/// always computed over fully resolved argument values. Every invocable node
/// consults the cache store; identical sub-trees anywhere in the document
/// share one fingerprint and their target runs once per run.
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

use super::fingerprint::fingerprint;
use super::node::{CallMode, ConfigNode, Invocation};
use super::registry::{Arguments, TargetRegistry};
use super::value::Value;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::{operations, services, status};
use crate::storage::{CacheEntry, CacheStore};

/// Counters for one resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Invocable nodes answered from the cache
    pub hits: usize,
    /// Invocable nodes that had to run their target
    pub misses: usize,
    /// Target calls made, including uncached nodes
    pub invocations: usize,
    /// Nodes with `_cache_result_: false` (or resolved without a store)
    pub uncached: usize,
}

pub struct Resolver<'a> {
    registry: &'a TargetRegistry,
    store: Option<&'a mut dyn CacheStore>,
    stats: ResolveStats,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a TargetRegistry, store: &'a mut dyn CacheStore) -> Self {
        Self {
            registry,
            store: Some(store),
            stats: ResolveStats::default(),
        }
    }

    /// Resolver that invokes every target on every occurrence
    pub fn without_cache(registry: &'a TargetRegistry) -> Self {
        Self {
            registry,
            store: None,
            stats: ResolveStats::default(),
        }
    }

    pub fn stats(&self) -> ResolveStats {
        self.stats
    }

    /// Resolve a node tree into its value
    ///
    /// The first failing node aborts the whole resolution. Entries cached
    /// before the failure stay in the store.
    pub fn resolve(&mut self, node: &ConfigNode) -> PipelineResult<Value> {
        self.resolve_node(node, true, "root")
    }

    fn resolve_node(&mut self, node: &ConfigNode, recursive: bool, path: &str) -> PipelineResult<Value> {
        match node {
            ConfigNode::Scalar(value) => Ok(value.clone()),
            ConfigNode::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.resolve_node(item, recursive, &format!("{}[{}]", path, i))?);
                }
                Ok(Value::List(out))
            }
            ConfigNode::Mapping(entries) => {
                let mut out = BTreeMap::new();
                for (key, child) in entries {
                    let value = self.resolve_node(child, recursive, &format!("{}.{}", path, key))?;
                    out.insert(key.clone(), value);
                }
                Ok(Value::Map(out))
            }
            ConfigNode::Invocable(inv) => {
                let recursive = inv.options.recursive.unwrap_or(recursive);
                self.resolve_invocation(inv, recursive, path)
            }
        }
    }

    /// Resolve a child argument; non-recursive nodes pass nested configs as data
    fn resolve_argument(&mut self, node: &ConfigNode, recursive: bool, path: &str) -> PipelineResult<Value> {
        if recursive {
            self.resolve_node(node, recursive, path)
        } else {
            Ok(node.to_value())
        }
    }

    fn resolve_invocation(&mut self, inv: &Invocation, recursive: bool, path: &str) -> PipelineResult<Value> {
        // Fail on unknown targets before doing any work below them
        let spec = self.registry.get(&inv.target, path)?.clone();

        let mut positional = Vec::with_capacity(inv.args.len());
        for (i, arg) in inv.args.iter().enumerate() {
            positional.push(self.resolve_argument(arg, recursive, &format!("{}._args_[{}]", path, i))?);
        }

        let mut keyword = BTreeMap::new();
        for (name, arg) in &inv.kwargs {
            let value = self.resolve_argument(arg, recursive, &format!("{}.{}", path, name))?;
            match inv.options.call {
                CallMode::Keyword => {
                    keyword.insert(name.clone(), value);
                }
                CallMode::Positional => positional.push(value),
            }
        }
        let args = Arguments::new(positional, keyword);

        let cacheable = inv.options.cache_result && self.store.is_some();
        if !cacheable {
            self.stats.uncached += 1;
            let (value, _) = self.invoke(&spec, inv, args, path)?;
            return Ok(value);
        }

        let key = fingerprint(spec.id(), inv.options.call, &args).map_err(|e| {
            PipelineError::Fingerprint {
                target: spec.id().to_string(),
                path: path.to_string(),
                argument: e.argument,
                reason: e.reason,
            }
        })?;

        if let Some(store) = self.store.as_deref() {
            if let Some(entry) = store.get(&key) {
                self.stats.hits += 1;
                debug!(
                    service = services::RESOLVER,
                    status = status::HIT,
                    fingerprint = key.short(),
                    target_id = spec.id(),
                    node = path,
                    "reusing cached result"
                );
                return Ok(entry.value.clone());
            }
        }

        self.stats.misses += 1;
        let (value, duration) = self.invoke(&spec, inv, args, path)?;

        if let Some(store) = self.store.as_deref_mut() {
            store.put(
                key,
                CacheEntry::computed(value.clone(), spec.id(), spec.is_deterministic(), duration),
            );
        }

        Ok(value)
    }

    fn invoke(
        &mut self,
        spec: &super::registry::TargetSpec,
        inv: &Invocation,
        args: Arguments,
        path: &str,
    ) -> PipelineResult<(Value, std::time::Duration)> {
        let start = Instant::now();
        self.stats.invocations += 1;

        let value = spec
            .call(args)
            .map_err(|source| PipelineError::TargetInvocation {
                target: spec.id().to_string(),
                path: path.to_string(),
                arg_names: inv.arg_names(),
                source,
            })?;

        let duration = start.elapsed();
        info!(
            service = services::RESOLVER,
            operation = operations::INVOKE,
            status = status::SUCCESS,
            target_id = spec.id(),
            node = path,
            duration_ms = duration.as_millis() as u64,
            "called target"
        );
        Ok((value, duration))
    }
}
