use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::ConfgraphConfig;

/// File name looked for in the working directory and its ancestors
pub const CONFIG_FILE_NAME: &str = "confgraph.toml";

/// Discovers confgraph configuration by traversing up the directory tree
///
/// Falls back to `~/.config/confgraph/config.toml` when no project file exists.
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    if let Some(found) = discover_project_config(start_dir) {
        return Ok(Some(found));
    }

    // Fallback to global config
    if let Some(home) = dirs::home_dir() {
        let global_config = home.join(".config/confgraph/config.toml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Nearest `confgraph.toml` in `start_dir` or one of its ancestors
pub fn discover_project_config(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path.
/// Otherwise, auto-discovers config by traversing up directory tree from cwd.
///
/// Returns Ok(None) if no config is found (neither explicit nor discovered).
/// A found config is validated before it is returned.
pub fn load_config_with_discovery(
    explicit_path: Option<&Path>,
) -> Result<Option<(PathBuf, ConfgraphConfig)>> {
    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let current_dir = std::env::current_dir()
                .context("Failed to get current directory for config discovery")?;
            discover_config(&current_dir)?
        }
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let config = ConfgraphConfig::from_file(&path)?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(Some((path, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discover_config_finds_nearest() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let project = root.join("project");
        let subdir = project.join("subdir");
        fs::create_dir_all(&subdir).unwrap();

        fs::write(root.join(CONFIG_FILE_NAME), "# outer config").unwrap();
        let config_path = project.join(CONFIG_FILE_NAME);
        fs::write(&config_path, "# test config").unwrap();

        let found = discover_config(&subdir).unwrap();
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_directory_named_like_config_is_ignored() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(project.join(CONFIG_FILE_NAME)).unwrap();

        assert_eq!(discover_project_config(&project), None);
    }

    #[test]
    fn test_load_explicit_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        fs::write(&path, "[cache]\npersist = true\ndir = \"snap\"\n").unwrap();

        let (loaded_from, config) = load_config_with_discovery(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded_from, path);
        assert!(config.cache.persist);
        assert_eq!(config.cache.dir, "snap");
    }

    #[test]
    fn test_load_invalid_config_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        fs::write(&path, "[cache]\nmin_persist_duration = \"forever\"\n").unwrap();

        assert!(load_config_with_discovery(Some(&path)).is_err());
        assert!(load_config_with_discovery(Some(&temp.path().join("missing.toml"))).is_err());
    }
}
