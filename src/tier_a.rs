// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tier-A adapter
//!
//! A small synchronous key-value store with a hard capacity ceiling. Keys map
//! to flat files holding serialized JSON text. `set` distinguishes the
//! overflow condition from every other failure, because overflow is the only
//! error the facade answers with migration. Corrupt stored text is treated as
//! absent for that single key, never as a whole-store failure.

use std::path::PathBuf;

use serde_json::Value;

use crate::error::{Result, StratumError};

/// Usage snapshot of the tier-A store
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StorageUsage {
    /// Bytes currently used
    pub used_bytes: u64,
    /// Configured capacity ceiling
    pub capacity_bytes: u64,
    /// Number of stored keys
    pub item_count: usize,
    /// Largest keys first, at most ten
    pub largest: Vec<(String, u64)>,
}

impl StorageUsage {
    /// Used capacity as a percentage
    pub fn percent(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.capacity_bytes as f64) * 100.0
    }
}

/// The synchronous quota-bounded store
pub struct LocalStore {
    /// Directory of key files
    dir: PathBuf,
    /// Hard capacity ceiling in bytes
    capacity_bytes: u64,
}

impl LocalStore {
    /// Create a store over the given directory.
    pub fn new(dir: PathBuf, capacity_bytes: u64) -> Self {
        Self {
            dir,
            capacity_bytes,
        }
    }

    /// File path for a key.
    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_key(key)))
    }

    /// Get the value stored for a key, or `None` if absent.
    ///
    /// Text that fails to deserialize is logged and reported as absent so a
    /// single damaged record cannot break all reads of its namespace.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(text) = self.get_raw(key) else {
            return Ok(None);
        };

        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key, error = %e, "corrupt tier-A record, treating as absent");
                Ok(None)
            }
        }
    }

    /// Get the raw serialized text for a key without parsing it.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        match std::fs::read_to_string(self.key_path(key)) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "tier-A read failed, treating as absent");
                None
            }
        }
    }

    /// Store a value under a key.
    ///
    /// Returns `StratumError::QuotaExceeded` when the projected usage would
    /// cross the capacity ceiling; every other error passes through
    /// unchanged. Usage is recomputed by directory scan so writes from
    /// concurrent contexts are accounted for.
    pub fn set(&self, key: &str, value: &Value) -> Result<()> {
        if key.is_empty() {
            return Err(StratumError::InvalidKey("empty key".to_string()));
        }

        let text = serde_json::to_string(value)?;
        let new_size = text.len() as u64;

        let existing_size = std::fs::metadata(self.key_path(key))
            .map(|m| m.len())
            .unwrap_or(0);
        let projected = self.used_bytes().saturating_sub(existing_size) + new_size;

        if projected > self.capacity_bytes {
            let available = self
                .capacity_bytes
                .saturating_sub(self.used_bytes().saturating_sub(existing_size));
            return Err(StratumError::QuotaExceeded {
                key: key.to_string(),
                needed: new_size,
                available,
            });
        }

        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        std::fs::write(self.key_path(key), text)?;
        Ok(())
    }

    /// Remove a key. Removing an absent key is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.key_path(key).exists()
    }

    /// List all stored keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();

        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return keys;
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(escaped) = name.strip_suffix(".json") {
                keys.push(unescape_key(escaped));
            }
        }

        keys.sort();
        keys
    }

    /// Total bytes used by all key files.
    pub fn used_bytes(&self) -> u64 {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };

        entries
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Usage snapshot including the largest keys.
    pub fn usage(&self) -> StorageUsage {
        let mut sizes: Vec<(String, u64)> = Vec::new();

        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy().to_string();
                if let Some(escaped) = name.strip_suffix(".json") {
                    if let Ok(meta) = entry.metadata() {
                        sizes.push((unescape_key(escaped), meta.len()));
                    }
                }
            }
        }

        let used_bytes = sizes.iter().map(|(_, s)| s).sum();
        let item_count = sizes.len();
        sizes.sort_by(|a, b| b.1.cmp(&a.1));
        sizes.truncate(10);

        StorageUsage {
            used_bytes,
            capacity_bytes: self.capacity_bytes,
            item_count,
            largest: sizes,
        }
    }

    /// Remove every stored key.
    pub fn clear(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }

        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                std::fs::remove_file(path)?;
            }
        }

        Ok(())
    }
}

/// Escape a key into a filesystem-safe filename stem.
pub(crate) fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' | b'.' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Inverse of `escape_key`. Malformed escapes are kept literally.
pub(crate) fn unescape_key(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(b) = u8::from_str_radix(&escaped[i + 1..i + 3], 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}
