// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Stratum
//!
//! Handles loading and saving settings from ~/.stratum/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StratumError};

/// Main settings structure, stored in ~/.stratum/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Base directory for both storage tiers (default: ~/.stratum/data)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Tier A (small, synchronous, quota-bounded) settings
    #[serde(default)]
    pub tier_a: TierAConfig,

    /// Tier B (large, asynchronous, transactional) settings
    #[serde(default)]
    pub tier_b: TierBConfig,

    /// In-memory cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Change observer settings
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Retention bounds per collection namespace
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Tier-A configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierAConfig {
    /// Hard capacity ceiling in bytes (default 5 MiB, mirroring the small
    /// key-value stores this tier models)
    #[serde(default = "default_tier_a_capacity")]
    pub capacity_bytes: u64,
}

impl Default for TierAConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_tier_a_capacity(),
        }
    }
}

/// Tier-B configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierBConfig {
    /// Bound on every tier-B operation, including initialization. A timeout
    /// is a failure, never a hang.
    #[serde(default = "default_tier_b_timeout_secs")]
    pub op_timeout_secs: u64,

    /// Records serialized above this size are stored zstd-compressed
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold_bytes: usize,
}

impl Default for TierBConfig {
    fn default() -> Self {
        Self {
            op_timeout_secs: default_tier_b_timeout_secs(),
            compress_threshold_bytes: default_compress_threshold(),
        }
    }
}

impl TierBConfig {
    /// Operation timeout as a `Duration`
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }
}

/// In-memory cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the facade keeps a memory cache at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache entry time-to-live in seconds (default 5 minutes)
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// Cache TTL as a `Duration`
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Change observer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Interval of the single shared polling timer, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ObserverConfig {
    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retention bounds for append-mostly collections. Truncation always drops
/// the oldest entries first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Bound for per-conversation message logs
    #[serde(default = "default_conversation_bound")]
    pub conversation: usize,

    /// Bound for per-group message logs
    #[serde(default = "default_group_bound")]
    pub group: usize,

    /// Bound for social-feed entries
    #[serde(default = "default_feed_bound")]
    pub feed: usize,

    /// Emergency-recovery bound for conversation logs (tighter than default)
    #[serde(default = "default_aggressive_conversation_bound")]
    pub aggressive_conversation: usize,

    /// Emergency-recovery bound for group logs
    #[serde(default = "default_aggressive_group_bound")]
    pub aggressive_group: usize,

    /// Emergency-recovery bound for feed entries
    #[serde(default = "default_aggressive_feed_bound")]
    pub aggressive_feed: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            conversation: default_conversation_bound(),
            group: default_group_bound(),
            feed: default_feed_bound(),
            aggressive_conversation: default_aggressive_conversation_bound(),
            aggressive_group: default_aggressive_group_bound(),
            aggressive_feed: default_aggressive_feed_bound(),
        }
    }
}

fn default_tier_a_capacity() -> u64 {
    5 * 1024 * 1024
}

fn default_tier_b_timeout_secs() -> u64 {
    8
}

fn default_compress_threshold() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_conversation_bound() -> usize {
    500
}

fn default_group_bound() -> usize {
    500
}

fn default_feed_bound() -> usize {
    200
}

fn default_aggressive_conversation_bound() -> usize {
    200
}

fn default_aggressive_group_bound() -> usize {
    200
}

fn default_aggressive_feed_bound() -> usize {
    100
}

impl Settings {
    /// Get the default settings file path.
    pub fn default_path() -> PathBuf {
        Self::stratum_home().join("config.toml")
    }

    /// Load settings from the default path.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load settings from a specific path. A missing file yields defaults.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the engine cannot run with.
    fn validate(&self) -> Result<()> {
        if self.tier_a.capacity_bytes == 0 {
            return Err(StratumError::Config(
                "tier_a.capacity_bytes must be greater than zero".to_string(),
            ));
        }
        if self.tier_b.op_timeout_secs == 0 {
            return Err(StratumError::Config(
                "tier_b.op_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.observer.poll_interval_ms == 0 {
            return Err(StratumError::Config(
                "observer.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the stratum home directory (~/.stratum or $STRATUM_HOME).
    pub fn stratum_home() -> PathBuf {
        if let Ok(home) = std::env::var("STRATUM_HOME") {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stratum")
    }

    /// Resolved data directory for both tiers.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Self::stratum_home().join("data"))
    }

    /// Tier-A directory (flat key files).
    pub fn tier_a_dir(&self) -> PathBuf {
        self.data_dir().join("tier_a")
    }

    /// Tier-B directory (record collections).
    pub fn tier_b_dir(&self) -> PathBuf {
        self.data_dir().join("tier_b")
    }

    /// Ensure both tier directories exist.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.tier_a_dir())?;
        std::fs::create_dir_all(self.tier_b_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.tier_a.capacity_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.tier_b.op_timeout_secs, 8);
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.ttl_secs, 300);
        assert_eq!(settings.observer.poll_interval_ms, 1000);
        assert_eq!(settings.retention.conversation, 500);
        assert_eq!(settings.retention.feed, 200);
    }

    #[test]
    fn test_aggressive_bounds_tighter_than_defaults() {
        let retention = RetentionConfig::default();
        assert!(retention.aggressive_conversation < retention.conversation);
        assert!(retention.aggressive_group < retention.group);
        assert!(retention.aggressive_feed < retention.feed);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.tier_a.capacity_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.tier_a.capacity_bytes = 1024;
        settings.observer.poll_interval_ms = 250;
        settings.save_to(&path).unwrap();

        let reloaded = Settings::load_from(&path).unwrap();
        assert_eq!(reloaded.tier_a.capacity_bytes, 1024);
        assert_eq!(reloaded.observer.poll_interval_ms, 250);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tier_a]\ncapacity_bytes = 2048\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.tier_a.capacity_bytes, 2048);
        assert_eq!(settings.cache.ttl_secs, 300);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tier_a]\ncapacity_bytes = 0\n").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(err, StratumError::Config(_)));
    }

    #[test]
    fn test_data_dir_override() {
        let mut settings = Settings::default();
        settings.data_dir = Some(PathBuf::from("/tmp/stratum-test"));
        assert_eq!(
            settings.tier_a_dir(),
            PathBuf::from("/tmp/stratum-test/tier_a")
        );
        assert_eq!(
            settings.tier_b_dir(),
            PathBuf::from("/tmp/stratum-test/tier_b")
        );
    }

    #[test]
    fn test_ensure_directories() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.data_dir = Some(dir.path().join("data"));

        settings.ensure_directories().unwrap();
        assert!(settings.tier_a_dir().exists());
        assert!(settings.tier_b_dir().exists());
    }

    #[test]
    fn test_durations() {
        let settings = Settings::default();
        assert_eq!(settings.tier_b.op_timeout(), Duration::from_secs(8));
        assert_eq!(settings.cache.ttl(), Duration::from_secs(300));
        assert_eq!(
            settings.observer.poll_interval(),
            Duration::from_millis(1000)
        );
    }
}
