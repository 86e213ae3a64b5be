/// Configuration merger: CLI args > Env vars > Config file > Defaults
///
/// This module handles merging configuration from multiple sources:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (handled by clap `env`)
/// 3. Configuration file
/// 4. Built-in defaults (lowest priority)
use anyhow::{Context, Result};
use std::path::PathBuf;

use confgraph::config::{parse_duration, ConfgraphConfig};
use confgraph::persistence::{ExclusionList, PersistenceSettings};

use crate::cli::{CacheArgs, RunArgs};

/// Merged configuration for the run command
#[derive(Debug, Clone)]
pub struct MergedRunConfig {
    pub persistence: PersistenceSettings,
    pub log_level: String,
}

impl MergedRunConfig {
    /// Merge configuration from CLI args and config file
    /// Precedence: CLI > env (already handled by clap) > config file > defaults
    ///
    /// Exclusion lists are unioned rather than overridden.
    pub fn merge(args: &RunArgs, file_config: Option<ConfgraphConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let mut exclude = ExclusionList::from_ids(&file.cache.exclude_targets);
        if let Some(list) = &args.exclude_persisting_targets {
            exclude.extend(&ExclusionList::parse(list));
        }

        let min_duration_text = args
            .min_persist_duration
            .as_deref()
            .unwrap_or(&file.cache.min_persist_duration);
        let min_duration = parse_duration(min_duration_text)
            .with_context(|| format!("Invalid minimum persist duration: {}", min_duration_text))?;

        Ok(Self {
            persistence: PersistenceSettings {
                caching_enabled: !args.no_cache && file.cache.enabled,
                persist: args.persist_cache || file.cache.persist,
                cache_dir: args
                    .cache_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(&file.cache.dir)),
                exclude,
                min_duration,
                verbose: args.cache_verbose || file.cache.verbose,
            },
            log_level: args
                .log_level
                .clone()
                .unwrap_or_else(|| file.observability.log_level.clone()),
        })
    }
}

/// Snapshot directory for the cache command
pub fn merged_cache_dir(args: &CacheArgs, file_config: Option<ConfgraphConfig>) -> PathBuf {
    args.cache_dir.clone().unwrap_or_else(|| {
        PathBuf::from(file_config.unwrap_or_default().cache.dir)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::time::Duration;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["confgraph", "run", "pipeline.json"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Run(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let merged = MergedRunConfig::merge(&run_args(&[]), None).unwrap();
        assert!(merged.persistence.caching_enabled);
        assert!(!merged.persistence.persist);
        assert_eq!(merged.persistence.cache_dir, PathBuf::from(".confgraph/cache"));
        assert_eq!(merged.persistence.min_duration, Duration::ZERO);
        assert_eq!(merged.log_level, "info");
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = ConfgraphConfig::default();
        file.cache.dir = "from-file".to_string();
        file.cache.min_persist_duration = "5m".to_string();
        file.cache.exclude_targets = vec!["file::target".to_string()];
        file.observability.log_level = "debug".to_string();

        let args = run_args(&[
            "-c",
            "from-cli",
            "--min-persist-duration",
            "2s",
            "-e",
            "cli::target",
            "-l",
            "warn",
            "--no-cache",
        ]);
        let merged = MergedRunConfig::merge(&args, Some(file)).unwrap();

        assert_eq!(merged.persistence.cache_dir, PathBuf::from("from-cli"));
        assert_eq!(merged.persistence.min_duration, Duration::from_secs(2));
        assert!(merged.persistence.exclude.contains("file::target"));
        assert!(merged.persistence.exclude.contains("cli::target"));
        assert!(!merged.persistence.caching_enabled);
        assert_eq!(merged.log_level, "warn");
    }

    #[test]
    fn test_file_enables_persistence() {
        let mut file = ConfgraphConfig::default();
        file.cache.persist = true;
        file.cache.verbose = true;

        let merged = MergedRunConfig::merge(&run_args(&[]), Some(file)).unwrap();
        assert!(merged.persistence.persist);
        assert!(merged.persistence.verbose);
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let args = run_args(&["--min-persist-duration", "later"]);
        assert!(MergedRunConfig::merge(&args, None).is_err());
    }
}
