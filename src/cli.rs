use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// confgraph - cached execution of config-graph pipelines
///
/// A pipeline is a JSON or TOML document whose mappings may name a target
/// (`_target_`). Targets are resolved bottom-up; identical sub-trees run once
/// per run and results can be persisted across runs.
#[derive(Parser, Debug)]
#[command(name = "confgraph")]
#[command(author = "Confgraph Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cached execution of config-graph pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a pipeline document and print its result
    Run(RunArgs),

    /// List registered targets and their canonical identifiers
    Targets,

    /// Inspect or clean the persisted result snapshot
    Cache(CacheArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Pipeline document (.json or .toml)
    pub pipeline: PathBuf,

    /// JSON pointer selecting the root node inside the document (e.g. "/pipelines/train")
    #[arg(long)]
    pub pointer: Option<String>,

    /// Load results from and flush them to the cache directory
    #[arg(short = 'p', long, env = "CONFGRAPH_PERSIST_CACHE")]
    pub persist_cache: bool,

    /// Snapshot directory used with --persist-cache
    #[arg(short = 'c', long, env = "CONFGRAPH_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Log every cache lookup and the flush summary
    #[arg(short = 'v', long, env = "CONFGRAPH_CACHE_VERBOSE")]
    pub cache_verbose: bool,

    /// Target identifiers whose results are never persisted, comma-separated
    #[arg(short = 'e', long, env = "CONFGRAPH_EXCLUDE_PERSISTING_TARGETS")]
    pub exclude_persisting_targets: Option<String>,

    /// Invoke every target on every occurrence
    #[arg(long, env = "CONFGRAPH_NO_CACHE")]
    pub no_cache: bool,

    /// Only persist results that took at least this long (e.g. "1s")
    #[arg(long, env = "CONFGRAPH_MIN_PERSIST_DURATION")]
    pub min_persist_duration: Option<String>,

    /// Config file path
    #[arg(long, env = "CONFGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(short = 'l', long, env = "CONFGRAPH_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Write the result to this file instead of stdout
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,

    /// Snapshot directory
    #[arg(short = 'c', long, global = true, env = "CONFGRAPH_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Config file path
    #[arg(long, global = true, env = "CONFGRAPH_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List persisted records
    List {
        /// Show creation time and duration of each record
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show snapshot statistics
    Stats,

    /// Delete persisted records
    Clean {
        /// Only delete records produced by this target
        #[arg(long)]
        target: Option<String>,
    },
}
