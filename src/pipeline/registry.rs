/// Target registry
///
/// Maps canonical target identifiers to callables. Pipelines name targets by
/// string; the registry is populated up front and lookups of unknown names
/// fail with `TargetNotFound` instead of any dynamic loading.
use std::collections::BTreeMap;
use std::sync::Arc;

use super::value::Value;
use crate::error::{PipelineError, PipelineResult};

/// Signature every target implements
pub type TargetFn = dyn Fn(Arguments) -> anyhow::Result<Value> + Send + Sync;

/// Resolved arguments handed to a target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn new(positional: Vec<Value>, keyword: BTreeMap<String, Value>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    /// Keyword argument that must be present
    pub fn required(&self, name: &str) -> anyhow::Result<&Value> {
        self.keyword
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: {}", name))
    }

    /// Keyword argument by name, falling back to a positional index
    pub fn named_or_positional(&self, name: &str, index: usize) -> Option<&Value> {
        self.keyword.get(name).or_else(|| self.positional.get(index))
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Value>, BTreeMap<String, Value>) {
        (self.positional, self.keyword)
    }
}

/// A registered target
#[derive(Clone)]
pub struct TargetSpec {
    id: String,
    func: Arc<TargetFn>,
    deterministic: bool,
}

impl TargetSpec {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-deterministic results are cached within a run but never persisted
    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    pub fn call(&self, args: Arguments) -> anyhow::Result<Value> {
        (self.func)(args)
    }
}

impl std::fmt::Debug for TargetSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSpec")
            .field("id", &self.id)
            .field("deterministic", &self.deterministic)
            .finish()
    }
}

/// Canonical identifier of a function item: its full Rust path.
///
/// This is what operators put in exclusion lists. The path is stable for a
/// given build; closures have no usable path and are rejected by
/// [`TargetRegistry::register_fn`].
pub fn canonical_target_id<F>(_target: &F) -> String {
    std::any::type_name::<F>().to_string()
}

#[derive(Default, Clone, Debug)]
pub struct TargetRegistry {
    targets: BTreeMap<String, TargetSpec>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target under an explicit identifier
    pub fn register<F>(&mut self, id: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(id.into(), Arc::new(func), true);
        self
    }

    /// Register a target whose result must never be persisted (clocks,
    /// random draws, anything reading ambient state)
    pub fn register_non_deterministic<F>(&mut self, id: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(id.into(), Arc::new(func), false);
        self
    }

    /// Register a function item under its canonical identifier
    pub fn register_fn<F>(&mut self, func: F) -> PipelineResult<&mut Self>
    where
        F: Fn(Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let id = checked_canonical_id(&func)?;
        self.insert(id, Arc::new(func), true);
        Ok(self)
    }

    /// Non-deterministic variant of [`register_fn`](Self::register_fn)
    pub fn register_fn_non_deterministic<F>(&mut self, func: F) -> PipelineResult<&mut Self>
    where
        F: Fn(Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let id = checked_canonical_id(&func)?;
        self.insert(id, Arc::new(func), false);
        Ok(self)
    }

    fn insert(&mut self, id: String, func: Arc<TargetFn>, deterministic: bool) {
        if self.targets.contains_key(&id) {
            tracing::warn!(target_id = %id, "replacing previously registered target");
        }
        self.targets.insert(
            id.clone(),
            TargetSpec {
                id,
                func,
                deterministic,
            },
        );
    }

    /// Look up a target; `path` locates the referencing node for the error
    pub fn get(&self, id: &str, path: &str) -> PipelineResult<&TargetSpec> {
        self.targets
            .get(id)
            .ok_or_else(|| PipelineError::TargetNotFound {
                target: id.to_string(),
                path: path.to_string(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    pub fn specs(&self) -> impl Iterator<Item = &TargetSpec> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn checked_canonical_id<F>(func: &F) -> PipelineResult<String> {
    let id = canonical_target_id(func);
    if id.contains("{{closure}}") {
        return Err(PipelineError::InvalidTarget(format!(
            "closures have no canonical identifier ({}); use register() with an explicit id",
            id
        )));
    }
    Ok(id)
}
