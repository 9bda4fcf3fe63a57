// src/config.rs

//! Configuration loading utilities.
//!
//! Convenience functions for loading configuration and seed requests from files.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{Config, QueueEntry, Request};

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)
        .map_err(|e| AppError::config(format!("Failed to load config from {path:?}: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file is missing or unreadable.
pub fn load_or_default(path: &Path) -> Config {
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return Config::default();
    }
    Config::load_or_default(path)
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    requests: Vec<QueueEntry>,
}

/// Load seed requests from a TOML file of `[[requests]]` tables.
pub fn load_seeds(path: &Path) -> Result<Vec<Request>> {
    let content = fs::read_to_string(path)?;
    let seeds: SeedFile = toml::from_str(&content)?;
    Ok(seeds.requests.into_iter().map(Request::from_entry).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Transitivity;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_falls_back() {
        let dir = TempDir::new().unwrap();
        let config = load_or_default(&dir.path().join("config.toml"));
        assert_eq!(config.queue.name, "normal");
        assert!(load_config(&dir.path().join("config.toml")).is_err());
    }

    #[test]
    fn test_load_config_validates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[crawler]\nworkers = 0\n").unwrap();
        assert!(load_config(&path).is_err());

        fs::write(&path, "[crawler]\nworkers = 4\n").unwrap();
        assert_eq!(load_config(&path).unwrap().crawler.workers, 4);
    }

    #[test]
    fn test_load_seeds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seeds.toml");
        fs::write(
            &path,
            r#"
[[requests]]
type = "npm"
url = "cd:/npm/npmjs/-/left-pad/1.3.0"

[[requests]]
type = "npm"
url = "cd:/npm/npmjs/-/pad-left/1.0.0"
policy = { transitivity = "shallow" }
"#,
        )
        .unwrap();

        let seeds = load_seeds(&path).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].kind, "npm");
        assert_eq!(seeds[1].policy.transitivity, Transitivity::Shallow);
        assert_eq!(seeds[1].attempt_count, 0);
    }
}
