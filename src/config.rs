use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::storage::cache_dir::DEFAULT_CACHE_DIR;

/// Complete confgraph configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfgraphConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Cache results of invocable nodes within a run
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Load from and flush to the snapshot directory
    #[serde(default)]
    pub persist: bool,

    /// Snapshot directory path
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Log every cache lookup and the flush summary at info level
    #[serde(default)]
    pub verbose: bool,

    /// Canonical target ids whose results are never persisted
    #[serde(default)]
    pub exclude_targets: Vec<String>,

    /// Results computed faster than this are not persisted (e.g. "1s", "5m")
    #[serde(default = "default_min_persist_duration")]
    pub min_persist_duration: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            persist: false,
            dir: default_cache_dir(),
            verbose: false,
            exclude_targets: Vec::new(),
            min_persist_duration: default_min_persist_duration(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_cache_dir() -> String {
    DEFAULT_CACHE_DIR.to_string()
}

fn default_min_persist_duration() -> String {
    "0s".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Parse a duration like "30s", "5m", "2h" or "1d"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Empty duration string"));
    }

    let unit_start = s.char_indices().last().map(|(i, _)| i).unwrap_or(0);
    let (num_str, unit) = s.split_at(unit_start);
    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}", s))?;

    let multiplier: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(anyhow!("Invalid duration unit: {}. Use: s, m, h, d", unit)),
    };
    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Invalid duration: {}", s))?;

    Ok(Duration::from_secs(seconds))
}

impl ConfgraphConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: ConfgraphConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.dir.trim().is_empty() {
            anyhow::bail!("cache.dir must be set");
        }

        parse_duration(&self.cache.min_persist_duration)
            .context("cache.min_persist_duration is invalid")?;

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.observability.log_level.to_lowercase().as_str())
        {
            anyhow::bail!("observability.log_level must be one of: trace, debug, info, warn, error");
        }

        for target in &self.cache.exclude_targets {
            if target.trim().is_empty() {
                anyhow::bail!("cache.exclude_targets must not contain empty identifiers");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfgraphConfig::default();
        assert!(config.cache.enabled);
        assert!(!config.cache.persist);
        assert_eq!(config.cache.dir, ".confgraph/cache");
        assert_eq!(config.cache.min_persist_duration, "0s");
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_validate_config() {
        assert!(ConfgraphConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = ConfgraphConfig::default();
        config.cache.min_persist_duration = "soon".to_string();
        assert!(config.validate().is_err());

        let mut config = ConfgraphConfig::default();
        config.cache.dir = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = ConfgraphConfig::default();
        config.observability.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ConfgraphConfig = toml::from_str(
            r#"
[cache]
persist = true
exclude_targets = ["a::b"]
"#,
        )
        .unwrap();

        assert!(config.cache.enabled);
        assert!(config.cache.persist);
        assert_eq!(config.cache.dir, ".confgraph/cache");
        assert_eq!(config.cache.exclude_targets, vec!["a::b"]);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5µ").is_err());
        assert!(parse_duration("999999999999999999d").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }
}
