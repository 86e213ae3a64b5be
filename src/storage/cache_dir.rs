use std::path::PathBuf;

/// Project-local snapshot directory used when nothing else is configured
pub const DEFAULT_CACHE_DIR: &str = ".confgraph/cache";

/// Default snapshot directory
///
/// Relative to the working directory so that each project keeps its own
/// snapshot next to its pipelines.
pub fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}
