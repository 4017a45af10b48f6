// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tier-B adapter
//!
//! The large asynchronous record store. Records live in named collections,
//! one file per record, zstd-compressed above a size threshold. Every
//! operation (including open) is bounded by a timeout: elapsing it is a
//! failure, never a hang. Schema upgrades run behind an in-process gate plus
//! a cross-process lock file; a fresh foreign lock surfaces as a distinct
//! blocked-upgrade condition instead of being retried silently.

pub mod schema;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::TierBConfig;
use crate::error::{Result, StratumError};
use crate::record::Record;
use crate::tier_a::{escape_key, unescape_key};
use schema::{collections_for, SchemaInfo, SCHEMA_VERSION};

/// Async record-store surface. The facade and migration engine depend on
/// this seam so tests can substitute a failing or stalling backend.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Get one record by primary key
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>>;

    /// Insert or replace a record
    async fn put(&self, collection: &str, record: &Record) -> Result<()>;

    /// List every record of a collection
    async fn get_all(&self, collection: &str) -> Result<Vec<Record>>;

    /// Delete one record. Deleting an absent record is not an error.
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;

    /// Remove every record of a collection
    async fn clear(&self, collection: &str) -> Result<()>;
}

/// Filesystem-backed record store
#[derive(Debug)]
pub struct RecordStore {
    /// Tier-B root directory
    dir: PathBuf,
    /// Bound applied to every operation
    op_timeout: Duration,
    /// Records serialized above this size are compressed
    compress_threshold: usize,
    /// In-process gate: only one schema upgrade runs at a time; concurrent
    /// openers wait for it instead of re-triggering it
    upgrade_gate: Mutex<()>,
}

impl RecordStore {
    /// Open the store, performing the schema check/upgrade before the handle
    /// is handed out. Fails explicitly if initialization exceeds the
    /// configured timeout, so callers can fall back to tier A only.
    pub async fn open(dir: PathBuf, config: &TierBConfig) -> Result<Arc<Self>> {
        let store = Arc::new(Self {
            dir,
            op_timeout: config.op_timeout(),
            compress_threshold: config.compress_threshold_bytes,
            upgrade_gate: Mutex::new(()),
        });

        tokio::time::timeout(store.op_timeout, store.initialize())
            .await
            .map_err(|_| StratumError::Unavailable("initialize timed out".to_string()))??;

        Ok(store)
    }

    /// Ensure the on-disk layout matches the current schema version.
    async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let on_disk = self.read_schema_version().await?;
        if on_disk < SCHEMA_VERSION {
            self.upgrade(on_disk).await?;
        }

        for collection in collections_for(SCHEMA_VERSION) {
            tokio::fs::create_dir_all(self.dir.join(collection)).await?;
        }

        Ok(())
    }

    /// Read the stamped schema version; a missing or corrupt marker counts
    /// as version 0 (fresh store).
    async fn read_schema_version(&self) -> Result<u32> {
        let path = self.dir.join("schema.json");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<SchemaInfo>(&text) {
                Ok(info) => Ok(info.version),
                Err(e) => {
                    tracing::warn!(error = %e, "corrupt schema marker, treating store as fresh");
                    Ok(0)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Run the one-time structural upgrade from `from` to the current
    /// version. Guarded so only one upgrade executes per process; the lock
    /// file extends the guard across processes.
    async fn upgrade(&self, from: u32) -> Result<()> {
        let _gate = self.upgrade_gate.lock().await;

        // Another task may have finished the upgrade while we waited.
        if self.read_schema_version().await? >= SCHEMA_VERSION {
            return Ok(());
        }

        let _lock = UpgradeLock::acquire(&self.dir, self.op_timeout)?;

        tracing::info!(from, to = SCHEMA_VERSION, "upgrading tier-B schema");

        for collection in collections_for(SCHEMA_VERSION) {
            tokio::fs::create_dir_all(self.dir.join(collection)).await?;
        }

        let marker = serde_json::to_string_pretty(&SchemaInfo::current())?;
        tokio::fs::write(self.dir.join("schema.json"), marker).await?;

        Ok(())
    }

    /// Wrap an operation in the store's timeout bound.
    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StratumError::Unavailable(format!("{what} timed out")))?
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.dir.join(collection)
    }

    fn record_path(&self, collection: &str, key: &str, compressed: bool) -> PathBuf {
        let ext = if compressed { "json.zst" } else { "json" };
        self.collection_dir(collection)
            .join(format!("{}.{}", escape_key(key), ext))
    }

    async fn read_record(&self, path: &PathBuf, compressed: bool) -> Result<Option<Record>> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let json = if compressed { decompress(&data)? } else { data };

        match serde_json::from_slice::<Record>(&json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e,
                    "corrupt tier-B record, treating as absent");
                Ok(None)
            }
        }
    }

    async fn get_inner(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        let plain = self.record_path(collection, key, false);
        if let Some(record) = self.read_record(&plain, false).await? {
            return Ok(Some(record));
        }

        let packed = self.record_path(collection, key, true);
        self.read_record(&packed, true).await
    }

    async fn put_inner(&self, collection: &str, record: &Record) -> Result<()> {
        let dir = self.collection_dir(collection);
        if !dir.exists() {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let json = serde_json::to_vec(record)?;
        let compressed = json.len() > self.compress_threshold;
        let data = if compressed { compress(&json)? } else { json };

        // Write-then-rename keeps a crash from leaving a half-written
        // record behind; readers only ever see the old copy or the new one.
        let path = self.record_path(collection, &record.key, compressed);
        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        // Drop the stale twin so reads never see an outdated copy first.
        let twin = self.record_path(collection, &record.key, !compressed);
        match tokio::fs::remove_file(&twin).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    async fn get_all_inner(&self, collection: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();

        let dir = self.collection_dir(collection);
        if !dir.exists() {
            return Ok(records);
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            let compressed = name.ends_with(".json.zst");
            if !compressed && !name.ends_with(".json") {
                continue;
            }

            if let Some(record) = self.read_record(&path, compressed).await? {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn delete_inner(&self, collection: &str, key: &str) -> Result<()> {
        for compressed in [false, true] {
            let path = self.record_path(collection, key, compressed);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn clear_inner(&self, collection: &str) -> Result<()> {
        let dir = self.collection_dir(collection);
        if !dir.exists() {
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() {
                tokio::fs::remove_file(path).await?;
            }
        }

        Ok(())
    }

    /// List record keys of a collection without reading record bodies.
    pub async fn keys(&self, collection: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        let dir = self.collection_dir(collection);
        if !dir.exists() {
            return Ok(keys);
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stem = name
                .strip_suffix(".json.zst")
                .or_else(|| name.strip_suffix(".json"));
            if let Some(stem) = stem {
                keys.push(unescape_key(stem));
            }
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Total bytes used under the tier-B directory.
    pub async fn used_bytes(&self) -> u64 {
        let mut total = 0u64;

        for collection in collections_for(SCHEMA_VERSION) {
            let dir = self.collection_dir(collection);
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Ok(meta) = entry.metadata().await {
                    total += meta.len();
                }
            }
        }

        total
    }
}

#[async_trait]
impl RecordBackend for RecordStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        self.bounded("get", self.get_inner(collection, key)).await
    }

    async fn put(&self, collection: &str, record: &Record) -> Result<()> {
        self.bounded("put", self.put_inner(collection, record))
            .await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        self.bounded("get_all", self.get_all_inner(collection))
            .await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.bounded("delete", self.delete_inner(collection, key))
            .await
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.bounded("clear", self.clear_inner(collection)).await
    }
}

/// Cross-process upgrade lock. Holding the file means a schema upgrade is in
/// flight in some context; a fresh foreign lock is the blocked-upgrade
/// condition, a stale one is assumed to belong to a crashed holder.
struct UpgradeLock {
    path: PathBuf,
}

impl UpgradeLock {
    fn acquire(dir: &PathBuf, freshness: Duration) -> Result<Self> {
        let path = dir.join(".upgrade.lock");

        for attempt in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let age = std::fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|t| t.elapsed().ok());

                    match age {
                        Some(age) if age > freshness && attempt == 0 => {
                            tracing::warn!(lock = %path.display(),
                                "breaking stale upgrade lock (holder presumed crashed)");
                            let _ = std::fs::remove_file(&path);
                        }
                        _ => {
                            return Err(StratumError::BlockedUpgrade(format!(
                                "another context holds {}",
                                path.display()
                            )));
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StratumError::BlockedUpgrade(format!(
            "could not acquire {}",
            path.display()
        )))
    }
}

impl Drop for UpgradeLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Compress record bytes with zstd.
fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)
        .map_err(|e| StratumError::Unavailable(format!("compressor init failed: {e}")))?;
    encoder
        .write_all(data)
        .map_err(|e| StratumError::Unavailable(format!("compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| StratumError::Unavailable(format!("compression finish failed: {e}")))
}

/// Decompress record bytes with zstd.
fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(data)
        .map_err(|e| StratumError::Unavailable(format!("decompressor init failed: {e}")))?;
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StratumError::Unavailable(format!("decompression failed: {e}")))?;
    Ok(out)
}
