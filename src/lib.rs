// Library interface for confgraph
// The binary and integration tests build on these modules

pub mod builtins;
pub mod config;
pub mod config_discovery;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod pipeline;
pub mod storage;

// Re-export commonly used types
pub use error::{PipelineError, PipelineResult};
pub use persistence::{ExclusionList, PersistenceController, PersistenceSettings, PipelineOutcome};
pub use pipeline::{canonical_target_id, ConfigNode, Resolver, TargetRegistry, Value};
pub use storage::{CacheStore, MemoryStore, PersistedStore};
