// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Stratum
//!
//! This module defines all error types used throughout the storage engine.

use thiserror::Error;

/// Main error type for Stratum operations
#[derive(Error, Debug)]
pub enum StratumError {
    /// Tier A refused a write because the capacity ceiling would be exceeded.
    /// This is the only error that triggers migration.
    #[error("quota exceeded: key '{key}' needs {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: u64,
        available: u64,
    },

    /// Tier B failed to initialize or an operation timed out
    #[error("tier B unavailable: {0}")]
    Unavailable(String),

    /// A schema upgrade cannot proceed because another context holds an
    /// incompatible open connection
    #[error("schema upgrade blocked: {0}")]
    BlockedUpgrade(String),

    /// A write could not be completed even after migration and retry
    #[error("terminal storage failure for '{key}': {reason}")]
    Terminal { key: String, reason: String },

    /// Migration failed; Tier A's copy was left untouched
    #[error("migration failed for namespace '{namespace}': {reason}")]
    Migration { namespace: String, reason: String },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// A key that cannot be mapped to a storage location
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),
}

impl StratumError {
    /// Whether this error is Tier A's overflow condition
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StratumError::QuotaExceeded { .. })
    }

    /// Whether this error should be retried by the caller (transient
    /// conditions), as opposed to terminal failures
    pub fn is_transient(&self) -> bool {
        matches!(self, StratumError::Unavailable(_))
    }
}

/// Result type alias for Stratum operations
pub type Result<T> = std::result::Result<T, StratumError>;

impl From<toml::de::Error> for StratumError {
    fn from(err: toml::de::Error) -> Self {
        StratumError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for StratumError {
    fn from(err: toml::ser::Error) -> Self {
        StratumError::Toml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_display() {
        let err = StratumError::QuotaExceeded {
            key: "chat_messages_42".to_string(),
            needed: 2048,
            available: 100,
        };
        assert!(err.to_string().contains("quota exceeded"));
        assert!(err.to_string().contains("chat_messages_42"));
        assert!(err.is_quota_exceeded());
    }

    #[test]
    fn test_unavailable_is_transient() {
        let err = StratumError::Unavailable("open timed out".to_string());
        assert!(err.is_transient());
        assert!(!err.is_quota_exceeded());
    }

    #[test]
    fn test_blocked_upgrade_display() {
        let err = StratumError::BlockedUpgrade("lock held by pid 4242".to_string());
        assert!(err.to_string().contains("upgrade blocked"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_terminal_display() {
        let err = StratumError::Terminal {
            key: "k".to_string(),
            reason: "retry after migration failed".to_string(),
        };
        assert!(err.to_string().contains("terminal storage failure"));
    }

    #[test]
    fn test_migration_display() {
        let err = StratumError::Migration {
            namespace: "chat_messages_1".to_string(),
            reason: "tier B write failed".to_string(),
        };
        assert!(err.to_string().contains("migration failed"));
    }

    #[test]
    fn test_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StratumError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ broken").unwrap_err();
        let err: StratumError = json_err.into();
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_result_type_alias() {
        fn ok_fn() -> Result<i32> {
            Ok(7)
        }
        assert_eq!(ok_fn().unwrap(), 7);
    }
}
