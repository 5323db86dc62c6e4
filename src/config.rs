//! Archiver configuration.
//!
//! Defaults can be overridden by an optional `config.json` in the store
//! directory, which in turn is overridden by command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.json";

/// What one archive run does for its chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviourConfig {
    pub download_media: bool,
    pub check_admin_log: bool,
    pub follow_live: bool,
    pub archive_history: bool,
    pub cleanup_duplicates: bool,
    /// Days re-scanned before the oldest archived message. 0 rescans everything.
    pub msg_history_overlap_days: u32,
    pub recheck_media: bool,
}

impl Default for BehaviourConfig {
    fn default() -> Self {
        Self {
            download_media: true,
            check_admin_log: true,
            follow_live: false,
            archive_history: true,
            cleanup_duplicates: false,
            msg_history_overlap_days: 2,
            recheck_media: false,
        }
    }
}

/// Partial behaviour, as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BehaviourOverrides {
    pub download_media: Option<bool>,
    pub check_admin_log: Option<bool>,
    pub follow_live: Option<bool>,
    pub archive_history: Option<bool>,
    pub cleanup_duplicates: Option<bool>,
    pub msg_history_overlap_days: Option<u32>,
    pub recheck_media: Option<bool>,
}

impl BehaviourConfig {
    pub fn merge(&self, overrides: &BehaviourOverrides) -> BehaviourConfig {
        BehaviourConfig {
            download_media: overrides.download_media.unwrap_or(self.download_media),
            check_admin_log: overrides.check_admin_log.unwrap_or(self.check_admin_log),
            follow_live: overrides.follow_live.unwrap_or(self.follow_live),
            archive_history: overrides.archive_history.unwrap_or(self.archive_history),
            cleanup_duplicates: overrides
                .cleanup_duplicates
                .unwrap_or(self.cleanup_duplicates),
            msg_history_overlap_days: overrides
                .msg_history_overlap_days
                .unwrap_or(self.msg_history_overlap_days),
            recheck_media: overrides.recheck_media.unwrap_or(self.recheck_media),
        }
    }
}

/// Tuning for the background subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsystemConfig {
    pub workers: usize,
    pub idle_poll_ms: u64,
    pub peer_cache_ttl_secs: u64,
    pub media_cache_ttl_secs: u64,
    pub sticker_cache_ttl_secs: u64,
    pub refresh_batch_size: usize,
    pub refresh_page_size: usize,
    pub retry_backoff_secs: u64,
    /// `None` retries unclassified failures forever.
    pub max_retries: Option<u32>,
    pub refresh_attempts: u32,
    pub run_save_interval_secs: u64,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            idle_poll_ms: 1000,
            peer_cache_ttl_secs: 6 * 60 * 60,
            media_cache_ttl_secs: 24 * 60 * 60,
            sticker_cache_ttl_secs: 24 * 60 * 60,
            refresh_batch_size: 3000,
            refresh_page_size: 100,
            retry_backoff_secs: 60,
            max_retries: None,
            refresh_attempts: 3,
            run_save_interval_secs: 180,
        }
    }
}

impl SubsystemConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn run_save_interval(&self) -> Duration {
        Duration::from_secs(self.run_save_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    pub behaviour: BehaviourConfig,
    pub subsystems: SubsystemConfig,
}

impl ArchiverConfig {
    /// Load `config.json` from the store directory, or defaults if absent.
    pub fn load(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: ArchiverConfig = serde_json::from_str(raw)?;
        if config.subsystems.workers == 0 {
            anyhow::bail!("subsystems.workers must be at least 1");
        }
        if config.subsystems.refresh_attempts == 0 {
            anyhow::bail!("subsystems.refresh_attempts must be at least 1");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ArchiverConfig::parse(
            r#"{ "behaviour": { "follow_live": true }, "subsystems": { "max_retries": 5 } }"#,
        )
        .expect("valid config");
        assert!(config.behaviour.follow_live);
        assert!(config.behaviour.download_media);
        assert_eq!(config.behaviour.msg_history_overlap_days, 2);
        assert_eq!(config.subsystems.max_retries, Some(5));
        assert_eq!(config.subsystems.workers, 2);
        assert_eq!(config.subsystems.retry_backoff(), Duration::from_secs(60));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = ArchiverConfig::parse(r#"{ "subsystems": { "workers": 0 } }"#)
            .expect_err("zero workers");
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn overrides_win_over_file() {
        let base = BehaviourConfig {
            cleanup_duplicates: true,
            ..BehaviourConfig::default()
        };
        let merged = base.merge(&BehaviourOverrides {
            download_media: Some(false),
            msg_history_overlap_days: Some(0),
            ..BehaviourOverrides::default()
        });
        assert!(!merged.download_media);
        assert!(merged.cleanup_duplicates);
        assert_eq!(merged.msg_history_overlap_days, 0);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ArchiverConfig::load(dir.path()).expect("defaults");
        assert_eq!(config, ArchiverConfig::default());
    }
}
