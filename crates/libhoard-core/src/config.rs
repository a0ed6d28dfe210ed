use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HoardError;
use crate::hash::DEFAULT_COMPRESSION_LEVEL;

/// Default size of the transfer worker pool
pub const DEFAULT_WORKERS: usize = 8;

/// Default bound on waiting for the manifest lock
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;

/// Machine-local settings stored in .git/hoard/config.toml
///
/// Unlike the manifest's remote settings these are never committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Transfer worker count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// How long to wait for the manifest lock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,
    /// gzip level, 0-9
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<u32>,
}

impl LocalConfig {
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS).max(1)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS))
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL).min(9)
    }
}

/// Path of the local config file for a git directory
pub fn local_config_path(git_dir: &Path) -> PathBuf {
    git_dir.join("hoard").join("config.toml")
}

/// Load local config; a missing file yields defaults
pub fn load_local_config(git_dir: &Path) -> Result<LocalConfig, HoardError> {
    let config_path = local_config_path(git_dir);
    if !config_path.exists() {
        return Ok(LocalConfig::default());
    }
    let content = std::fs::read_to_string(&config_path)?;
    let config: LocalConfig = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_local_config(dir.path()).unwrap();
        assert_eq!(config, LocalConfig::default());
        assert_eq!(config.workers(), DEFAULT_WORKERS);
        assert_eq!(config.lock_timeout(), Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS));
        assert_eq!(config.compression_level(), DEFAULT_COMPRESSION_LEVEL);
    }

    #[test]
    fn test_load_local_config() {
        let dir = tempdir().unwrap();
        let path = local_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "workers = 3\nlock_timeout_ms = 500\ncompression_level = 12\n").unwrap();
        let loaded = load_local_config(dir.path()).unwrap();

        assert_eq!(
            loaded,
            LocalConfig {
                workers: Some(3),
                lock_timeout_ms: Some(500),
                compression_level: Some(12),
            }
        );
        assert_eq!(loaded.workers(), 3);
        assert_eq!(loaded.lock_timeout(), Duration::from_millis(500));
        // Clamped to gzip's range
        assert_eq!(loaded.compression_level(), 9);
    }

    #[test]
    fn test_zero_workers_clamped() {
        let config = LocalConfig {
            workers: Some(0),
            ..Default::default()
        };
        assert_eq!(config.workers(), 1);
    }
}
