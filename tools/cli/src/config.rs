//! CLI configuration stored as `config.json` in the data directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use inkboard_common::ErrorCode;
use inkboard_sync::{RetryConfig, SyncConfig};

/// Retry policy for remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Whether `RATE_LIMITED` failures are retried.
    pub rate_limited_retryable: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            rate_limited_retryable: true,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory acting as the remote copy.
    pub remote_folder: Option<PathBuf>,
    pub retry: RetrySettings,
    /// Quiet period after local edits before auto-sync starts a pass.
    pub debounce_ms: u64,
    /// How long a conflict prompt may stay unanswered.
    pub conflict_timeout_secs: u64,
    /// Human readable name for this device.
    pub device_label: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_folder: None,
            retry: RetrySettings::default(),
            debounce_ms: 2000,
            conflict_timeout_secs: 600,
            device_label: None,
        }
    }
}

impl AppConfig {
    pub const FILE_NAME: &'static str = "config.json";

    /// `<data dir>/inkboard`, or `./inkboard` when the platform has none.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("inkboard")
    }

    /// Load from `data_dir`, falling back to defaults when no file exists.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(Self::FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn sync_config(&self) -> SyncConfig {
        let mut retry = RetryConfig::new(self.retry.max_retries)
            .with_base_delay(Duration::from_millis(self.retry.base_delay_ms));
        if !self.retry.rate_limited_retryable {
            retry = retry.with_non_retryable(ErrorCode::RateLimited);
        }

        SyncConfig {
            retry,
            conflict_timeout: Duration::from_secs(self.conflict_timeout_secs),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.debounce(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_file_is_completed_with_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(AppConfig::FILE_NAME),
            r#"{"remote_folder": "/mnt/share/inkboard", "retry": {"max_retries": 5}}"#,
        )
        .unwrap();

        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(
            config.remote_folder,
            Some(PathBuf::from("/mnt/share/inkboard"))
        );
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.conflict_timeout_secs, 600);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            device_label: Some("studio laptop".into()),
            ..AppConfig::default()
        };
        config.save(dir.path()).unwrap();

        assert_eq!(AppConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_rate_limit_policy() {
        let mut config = AppConfig::default();
        assert!(!config
            .sync_config()
            .retry
            .non_retryable
            .contains(&ErrorCode::RateLimited));

        config.retry.rate_limited_retryable = false;
        assert!(config
            .sync_config()
            .retry
            .non_retryable
            .contains(&ErrorCode::RateLimited));
    }
}
