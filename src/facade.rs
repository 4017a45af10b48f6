// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Unified storage facade
//!
//! One read/write surface over both tiers plus a TTL'd memory cache. Reads
//! probe cache, then tier A, then tier B; a tier descriptor recorded by a
//! past migration short-circuits the probe. Writes route to the namespace's
//! authoritative tier; a tier-A quota overflow migrates the namespace to
//! tier B and retries exactly once before giving up with a terminal error.
//!
//! Tier B being unreachable degrades the store to tier A only instead of
//! failing open: reads and small writes keep working, migration-dependent
//! paths report the underlying error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::Settings;
use crate::error::{Result, StratumError};
use crate::migrate::Migrator;
use crate::namespace::{Namespace, Tier};
use crate::observer::{ChangeObserver, WatchGuard};
use crate::record::Record;
use crate::tier_a::LocalStore;
use crate::tier_b::{RecordBackend, RecordStore};

/// Caller preference for where a write should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierHint {
    /// Route by descriptor, falling back to tier A
    #[default]
    Auto,
    /// Force tier A; overflow still escalates through migration
    TierA,
    /// Force tier B; fails when tier B is unreachable
    TierB,
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
}

/// The single storage surface application code talks to.
pub struct UnifiedStore {
    tier_a: Arc<LocalStore>,
    tier_b: Option<Arc<RecordStore>>,
    migrator: Option<Arc<Migrator>>,
    observer: Arc<ChangeObserver>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_enabled: bool,
    cache_ttl: Duration,
}

impl UnifiedStore {
    /// Open both tiers under the configured data directory. An unreachable
    /// tier B is logged and the store degrades to tier A only.
    pub async fn open(settings: &Settings) -> Result<Self> {
        settings.ensure_directories()?;
        let tier_a = Arc::new(LocalStore::new(
            settings.tier_a_dir(),
            settings.tier_a.capacity_bytes,
        ));

        let tier_b = match RecordStore::open(settings.tier_b_dir(), &settings.tier_b).await {
            Ok(store) => Some(store),
            Err(e @ StratumError::BlockedUpgrade(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "tier B unavailable, degrading to tier A only");
                None
            }
        };

        let migrator = match &tier_b {
            Some(store) => Some(Arc::new(
                Migrator::load(
                    tier_a.clone(),
                    store.clone() as Arc<dyn RecordBackend>,
                    settings.retention.clone(),
                )
                .await?,
            )),
            None => None,
        };

        let observer = ChangeObserver::new(tier_a.clone(), settings.observer.poll_interval());

        Ok(Self {
            tier_a,
            tier_b,
            migrator,
            observer,
            cache: Mutex::new(HashMap::new()),
            cache_enabled: settings.cache.enabled,
            cache_ttl: settings.cache.ttl(),
        })
    }

    /// Read a key: memory cache first, then tier A, then tier B. An absent
    /// key and a corrupt one both read as `None`.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.cache_get(key) {
            return Ok(Some(value));
        }

        let namespace = Namespace::classify(key);

        // A recorded descriptor skips the tier-A probe entirely.
        if self.tier_for(key).await == Some(Tier::B) {
            let value = self.read_tier_b(&namespace, key).await?;
            if let Some(v) = &value {
                self.cache_put(key, v);
            }
            return Ok(value);
        }

        if let Some(value) = self.tier_a.get(key)? {
            self.cache_put(key, &value);
            // Large collections found in tier A belong in tier B; move them
            // on first read so the next overflow never involves this key.
            if namespace.is_large_collection() {
                if let Some(migrator) = &self.migrator {
                    if let Err(e) = migrator.migrate(&namespace).await {
                        tracing::warn!(key, error = %e, "read-through migration failed");
                    }
                }
            }
            return Ok(Some(value));
        }

        let value = self.read_tier_b(&namespace, key).await?;
        if let Some(v) = &value {
            self.cache_put(key, v);
        }
        Ok(value)
    }

    async fn read_tier_b(&self, namespace: &Namespace, key: &str) -> Result<Option<Value>> {
        let Some(tier_b) = &self.tier_b else {
            return Ok(None);
        };
        let record = tier_b.get(namespace.collection(), key).await?;
        Ok(record.map(|r| r.value))
    }

    /// Write a key, routing by descriptor.
    pub async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.set_with_hint(key, value, TierHint::Auto).await
    }

    /// Write a key with an explicit tier preference.
    pub async fn set_with_hint(&self, key: &str, value: &Value, hint: TierHint) -> Result<()> {
        let namespace = Namespace::classify(key);

        let target = match hint {
            TierHint::TierA => Tier::A,
            TierHint::TierB => Tier::B,
            TierHint::Auto => self.tier_for(key).await.unwrap_or(Tier::A),
        };

        match target {
            Tier::B => self.write_tier_b(&namespace, key, value).await?,
            Tier::A => match self.tier_a.set(key, value) {
                Ok(()) => {}
                Err(e) if e.is_quota_exceeded() => {
                    tracing::warn!(key, "tier A quota exceeded, migrating namespace");
                    self.overflow_to_tier_b(&namespace, key, value).await?;
                }
                Err(e) => return Err(e),
            },
        }

        self.cache_put(key, value);
        self.observer.trigger(key);
        Ok(())
    }

    /// Overflow path: move the namespace to tier B, then retry the write
    /// there exactly once. Any failure is terminal for this write; tier A
    /// still holds whatever it held before.
    async fn overflow_to_tier_b(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &Value,
    ) -> Result<()> {
        let Some(migrator) = &self.migrator else {
            return Err(StratumError::Terminal {
                key: key.to_string(),
                reason: "tier A full and tier B unavailable".to_string(),
            });
        };

        migrator
            .migrate(namespace)
            .await
            .map_err(|e| StratumError::Terminal {
                key: key.to_string(),
                reason: format!("migration after overflow failed: {e}"),
            })?;

        self.write_tier_b(namespace, key, value)
            .await
            .map_err(|e| StratumError::Terminal {
                key: key.to_string(),
                reason: format!("tier B write after migration failed: {e}"),
            })
    }

    async fn write_tier_b(&self, namespace: &Namespace, key: &str, value: &Value) -> Result<()> {
        let Some(tier_b) = &self.tier_b else {
            return Err(StratumError::Unavailable(
                "tier B is not open".to_string(),
            ));
        };
        tier_b
            .put(namespace.collection(), &Record::new(key, value.clone()))
            .await
    }

    /// Remove a key from the cache and both tiers. Removing an absent key
    /// succeeds.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.cache.lock().unwrap().remove(key);
        self.tier_a.remove(key)?;
        if let Some(tier_b) = &self.tier_b {
            let namespace = Namespace::classify(key);
            tier_b.delete(namespace.collection(), key).await?;
        }
        self.observer.trigger(key);
        Ok(())
    }

    /// Drop everything: cache, tier A, and every known tier-B collection.
    pub async fn clear(&self) -> Result<()> {
        self.cache.lock().unwrap().clear();
        self.tier_a.clear()?;
        if let (Some(tier_b), Some(migrator)) = (&self.tier_b, &self.migrator) {
            for collection in migrator.known_collections().await {
                tier_b.clear(&collection).await?;
            }
            migrator.reset().await;
        }
        Ok(())
    }

    /// Watch a tier-A key for changes.
    pub fn observe(
        self: &Arc<Self>,
        key: &str,
        callback: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) -> WatchGuard {
        self.observer.observe(key, callback)
    }

    /// Drop cache entries older than the TTL.
    pub fn purge_expired_cache(&self) {
        let ttl = self.cache_ttl;
        self.cache
            .lock()
            .unwrap()
            .retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }

    async fn tier_for(&self, key: &str) -> Option<Tier> {
        match &self.migrator {
            Some(migrator) => migrator.tier_for(key).await,
            None => None,
        }
    }

    fn cache_get(&self, key: &str) -> Option<Value> {
        if !self.cache_enabled {
            return None;
        }
        let mut cache = self.cache.lock().unwrap();
        match cache.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.cache_ttl => {
                Some(entry.value.clone())
            }
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, key: &str, value: &Value) {
        if !self.cache_enabled {
            return;
        }
        self.cache.lock().unwrap().insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Whether tier B came up; false means the store runs degraded.
    pub fn has_tier_b(&self) -> bool {
        self.tier_b.is_some()
    }

    pub fn tier_a(&self) -> &Arc<LocalStore> {
        &self.tier_a
    }

    pub fn tier_b_store(&self) -> Option<&Arc<RecordStore>> {
        self.tier_b.as_ref()
    }

    pub fn migrator(&self) -> Option<&Arc<Migrator>> {
        self.migrator.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, tier_a_capacity: u64) -> Settings {
        let mut settings = Settings::default();
        settings.data_dir = Some(dir.path().join("data"));
        settings.tier_a.capacity_bytes = tier_a_capacity;
        settings
    }

    #[tokio::test]
    async fn test_set_get_roundtrip_through_tier_a() {
        let dir = TempDir::new().unwrap();
        let store = UnifiedStore::open(&settings(&dir, 1024 * 1024)).await.unwrap();

        store.set("apiSettings", &json!({"theme": "dark"})).await.unwrap();
        assert_eq!(
            store.get("apiSettings").await.unwrap(),
            Some(json!({"theme": "dark"}))
        );
        assert!(store.tier_a().contains("apiSettings"));
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let dir = TempDir::new().unwrap();
        let store = UnifiedStore::open(&settings(&dir, 1024)).await.unwrap();
        assert_eq!(store.get("nothing_here").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overflow_migrates_and_write_succeeds() {
        let dir = TempDir::new().unwrap();
        // Small quota so the second write overflows.
        let store = UnifiedStore::open(&settings(&dir, 600)).await.unwrap();

        let small = json!([{"id": 1, "sender": "a", "content": "hi"}]);
        store.set("chat_messages_alice", &small).await.unwrap();

        let big: Value = (0..20)
            .map(|i| json!({"id": i, "sender": "a", "content": format!("message {i}")}))
            .collect::<Vec<_>>()
            .into();
        store.set("chat_messages_alice", &big).await.unwrap();

        // The value is readable and tier A no longer holds the key.
        assert_eq!(store.get("chat_messages_alice").await.unwrap(), Some(big));
        assert!(!store.tier_a().contains("chat_messages_alice"));
    }

    #[tokio::test]
    async fn test_writes_after_migration_stay_in_tier_b() {
        let dir = TempDir::new().unwrap();
        let store = UnifiedStore::open(&settings(&dir, 600)).await.unwrap();

        store
            .set("chat_messages_bob", &json!([{"id": 1, "sender": "b", "content": "x"}]))
            .await
            .unwrap();
        let big: Value = (0..20)
            .map(|i| json!({"id": i, "sender": "b", "content": format!("message {i}")}))
            .collect::<Vec<_>>()
            .into();
        store.set("chat_messages_bob", &big).await.unwrap();

        // Subsequent small writes route to tier B, never back to tier A.
        store
            .set("chat_messages_bob", &json!([{"id": 99, "sender": "b", "content": "y"}]))
            .await
            .unwrap();
        assert!(!store.tier_a().contains("chat_messages_bob"));
        assert_eq!(
            store.get("chat_messages_bob").await.unwrap(),
            Some(json!([{"id": 99, "sender": "b", "content": "y"}]))
        );
    }

    #[tokio::test]
    async fn test_hint_forces_tier_b() {
        let dir = TempDir::new().unwrap();
        let store = UnifiedStore::open(&settings(&dir, 1024 * 1024)).await.unwrap();

        store
            .set_with_hint("feed_posts", &json!([{"id": 1}]), TierHint::TierB)
            .await
            .unwrap();

        assert!(!store.tier_a().contains("feed_posts"));
        assert_eq!(
            store.get("feed_posts").await.unwrap(),
            Some(json!([{"id": 1}]))
        );
    }

    #[tokio::test]
    async fn test_remove_clears_both_tiers() {
        let dir = TempDir::new().unwrap();
        let store = UnifiedStore::open(&settings(&dir, 1024 * 1024)).await.unwrap();

        store.set("apiSettings", &json!(1)).await.unwrap();
        store
            .set_with_hint("feed_posts", &json!([1]), TierHint::TierB)
            .await
            .unwrap();

        store.remove("apiSettings").await.unwrap();
        store.remove("feed_posts").await.unwrap();
        store.remove("never_existed").await.unwrap();

        assert_eq!(store.get("apiSettings").await.unwrap(), None);
        assert_eq!(store.get("feed_posts").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_empties_everything() {
        let dir = TempDir::new().unwrap();
        let store = UnifiedStore::open(&settings(&dir, 1024 * 1024)).await.unwrap();

        store.set("apiSettings", &json!(1)).await.unwrap();
        store
            .set_with_hint("chat_messages_a", &json!([{"id": 1}]), TierHint::TierB)
            .await
            .unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.get("apiSettings").await.unwrap(), None);
        assert_eq!(store.get("chat_messages_a").await.unwrap(), None);
        assert!(store.tier_a().keys().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_tier_a_value_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = UnifiedStore::open(&settings(&dir, 1024 * 1024)).await.unwrap();

        store.set("good", &json!("v")).await.unwrap();
        std::fs::write(
            dir.path().join("data/tier_a/apiSettings.json"),
            b"{not json",
        )
        .unwrap();

        assert_eq!(store.get("apiSettings").await.unwrap(), None);
        assert_eq!(store.get("good").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_reads() {
        let dir = TempDir::new().unwrap();
        let store = UnifiedStore::open(&settings(&dir, 1024 * 1024)).await.unwrap();

        store.set("k", &json!("v")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));

        // Mutate tier A behind the facade's back; the cached value wins
        // until it expires or the key is written through the facade.
        store.tier_a().set("k", &json!("other")).unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_read_through_migration_moves_chat_to_tier_b() {
        let dir = TempDir::new().unwrap();
        let store = UnifiedStore::open(&settings(&dir, 1024 * 1024)).await.unwrap();

        // Seed tier A directly, as if written by an older deployment.
        store
            .tier_a()
            .set("chat_messages_old", &json!([{"id": 1, "sender": "a", "content": "x"}]))
            .unwrap();

        let value = store.get("chat_messages_old").await.unwrap();
        assert!(value.is_some());
        assert!(!store.tier_a().contains("chat_messages_old"));
        assert_eq!(
            store
                .migrator()
                .unwrap()
                .tier_for("chat_messages_old")
                .await,
            Some(Tier::B)
        );
    }
}
