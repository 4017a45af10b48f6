// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Migration and compaction engine
//!
//! Moves a namespace's authoritative data from tier A to tier B and keeps
//! collections bounded. The order is fixed: read from A, truncate and
//! compact, write to B, verify the write, and only then delete from A. A
//! failed tier-B write leaves tier A untouched, so the source of truth stays
//! available even if stale-looking.
//!
//! The engine also owns the tier descriptors (which tier holds the
//! authoritative copy of each namespace) and the registry of tier-B
//! collection names used by whole-store clear. Both are persisted in the
//! `meta` collection; the in-memory copies are a routing optimization only —
//! the facade's fixed probe order keeps reads correct even when a descriptor
//! was lost.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::RetentionConfig;
use crate::error::{Result, StratumError};
use crate::namespace::{Namespace, Tier};
use crate::record::{compact_collection, Record};
use crate::tier_a::LocalStore;
use crate::tier_b::{schema, RecordBackend};

/// Meta record holding the tier descriptor map
const DESCRIPTORS_KEY: &str = "tier_descriptors";
/// Meta record holding the registry of collection names
const REGISTRY_KEY: &str = "collections";

/// What a migration call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Data moved to tier B; counts what was kept and what retention dropped
    Migrated { entries: usize, dropped: usize },
    /// Descriptor already points at tier B and tier A holds nothing — a safe
    /// no-op when two contexts race to migrate the same namespace
    AlreadyMigrated,
    /// Tier A holds nothing for this namespace
    NothingToMigrate,
}

/// Result of a whole-store migration sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Namespaces moved to tier B
    pub migrated: usize,
    /// Namespaces that failed (left untouched in tier A)
    pub failed: usize,
    /// Total entries now held in tier B for the swept namespaces
    pub entries: usize,
}

/// The migration engine
pub struct Migrator {
    tier_a: Arc<LocalStore>,
    tier_b: Arc<dyn RecordBackend>,
    retention: RetentionConfig,
    /// namespace key -> authoritative tier
    descriptors: RwLock<HashMap<String, Tier>>,
    /// collection names known to hold records
    registry: RwLock<Vec<String>>,
}

impl Migrator {
    /// Build the engine, loading descriptors and the collection registry
    /// from the `meta` collection.
    pub async fn load(
        tier_a: Arc<LocalStore>,
        tier_b: Arc<dyn RecordBackend>,
        retention: RetentionConfig,
    ) -> Result<Self> {
        let descriptors = match tier_b.get("meta", DESCRIPTORS_KEY).await {
            Ok(Some(record)) => serde_json::from_value(record.value).unwrap_or_default(),
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!(error = %e, "could not load tier descriptors, starting empty");
                HashMap::new()
            }
        };

        let registry = match tier_b.get("meta", REGISTRY_KEY).await {
            Ok(Some(record)) => serde_json::from_value(record.value).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "could not load collection registry, starting empty");
                Vec::new()
            }
        };

        Ok(Self {
            tier_a,
            tier_b,
            retention,
            descriptors: RwLock::new(descriptors),
            registry: RwLock::new(registry),
        })
    }

    /// Which tier holds the authoritative copy of a namespace, if a
    /// migration ever recorded one.
    pub async fn tier_for(&self, namespace_key: &str) -> Option<Tier> {
        self.descriptors.read().await.get(namespace_key).copied()
    }

    /// Collections known to hold records, merged with the schema's built-in
    /// list. Used by whole-store clear.
    pub async fn known_collections(&self) -> Vec<String> {
        let mut all: Vec<String> = schema::builtin_collections()
            .iter()
            .map(|s| s.to_string())
            .collect();
        for name in self.registry.read().await.iter() {
            if !all.contains(name) {
                all.push(name.clone());
            }
        }
        all
    }

    /// Migrate one namespace with its normal retention bound.
    pub async fn migrate(&self, namespace: &Namespace) -> Result<MigrationOutcome> {
        let bound = namespace.retention_bound(&self.retention);
        self.migrate_with_bound(namespace, bound).await
    }

    /// Migrate one namespace, truncating collections to `bound` entries.
    pub async fn migrate_with_bound(
        &self,
        namespace: &Namespace,
        bound: Option<usize>,
    ) -> Result<MigrationOutcome> {
        let key = namespace.key();

        // Duplicate migration of an already-migrated namespace is a no-op;
        // two contexts can race here and both must succeed.
        if self.tier_for(&key).await == Some(Tier::B) && !self.tier_a.contains(&key) {
            return Ok(MigrationOutcome::AlreadyMigrated);
        }

        let Some(value) = self.tier_a.get(&key)? else {
            return Ok(MigrationOutcome::NothingToMigrate);
        };

        let (value, dropped) = if namespace.is_collection() {
            truncate_entries(value, bound)
        } else {
            (value, 0)
        };
        let value = compact_collection(namespace, &value);
        let entries = value.as_array().map(|a| a.len()).unwrap_or(1);

        let collection = namespace.collection();
        let record = Record::new(&key, value.clone());

        self.tier_b
            .put(collection, &record)
            .await
            .map_err(|e| StratumError::Migration {
                namespace: key.clone(),
                reason: format!("tier B write failed: {e}"),
            })?;

        // Verify before touching tier A: the write must be readable and
        // carry what we sent.
        let confirmed = self
            .tier_b
            .get(collection, &key)
            .await
            .map_err(|e| StratumError::Migration {
                namespace: key.clone(),
                reason: format!("tier B verify failed: {e}"),
            })?;
        match confirmed {
            Some(record) if record.value == value => {}
            _ => {
                return Err(StratumError::Migration {
                    namespace: key.clone(),
                    reason: "tier B verify mismatch".to_string(),
                });
            }
        }

        self.tier_a.remove(&key)?;
        self.record_migration(&key, collection).await;

        tracing::debug!(namespace = %key, entries, dropped, "migrated namespace to tier B");
        Ok(MigrationOutcome::Migrated { entries, dropped })
    }

    /// Stamp the descriptor and collection registry after a completed
    /// migration. Persistence failures are logged, not fatal: routing
    /// degrades to probing.
    async fn record_migration(&self, namespace_key: &str, collection: &str) {
        {
            let mut descriptors = self.descriptors.write().await;
            descriptors.insert(namespace_key.to_string(), Tier::B);
            let snapshot = descriptors.clone();
            drop(descriptors);
            self.persist_meta(DESCRIPTORS_KEY, &snapshot).await;
        }

        let mut registry = self.registry.write().await;
        if !registry.iter().any(|c| c == collection) {
            registry.push(collection.to_string());
            let snapshot = registry.clone();
            drop(registry);
            self.persist_meta(REGISTRY_KEY, &snapshot).await;
        }
    }

    async fn persist_meta<T: serde::Serialize>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "could not serialize meta record");
                return;
            }
        };
        if let Err(e) = self.tier_b.put("meta", &Record::new(key, value)).await {
            tracing::warn!(key, error = %e, "could not persist meta record");
        }
    }

    /// Migrate every collection namespace currently held in tier A.
    pub async fn migrate_all(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for key in self.tier_a.keys() {
            let namespace = Namespace::classify(&key);
            if !namespace.is_collection() {
                continue;
            }

            match self.migrate(&namespace).await {
                Ok(MigrationOutcome::Migrated { entries, .. }) => {
                    report.migrated += 1;
                    report.entries += entries;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(namespace = %key, error = %e, "sweep migration failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Rewrite a namespace's stored record with field-stripped entries,
    /// wherever it currently lives. Runs on demand, never during reads.
    pub async fn compact_namespace(&self, namespace: &Namespace) -> Result<()> {
        let key = namespace.key();

        if self.tier_for(&key).await == Some(Tier::B) {
            let collection = namespace.collection();
            if let Some(record) = self.tier_b.get(collection, &key).await? {
                let compacted = compact_collection(namespace, &record.value);
                if compacted != record.value {
                    self.tier_b
                        .put(collection, &Record::new(&key, compacted))
                        .await?;
                }
            }
            return Ok(());
        }

        if let Some(value) = self.tier_a.get(&key)? {
            let compacted = compact_collection(namespace, &value);
            if compacted != value {
                self.tier_a.set(&key, &compacted)?;
            }
        }
        Ok(())
    }

    /// Forget every descriptor and registry entry (used by whole-store
    /// clear, after the backing collections are gone).
    pub async fn reset(&self) {
        self.descriptors.write().await.clear();
        self.registry.write().await.clear();
    }

    /// Retention configuration in effect.
    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }
}

/// Keep only the newest `bound` entries of a collection value, dropping the
/// oldest first and preserving relative order. Non-arrays and unbounded
/// namespaces pass through.
pub fn truncate_entries(value: Value, bound: Option<usize>) -> (Value, usize) {
    let Some(bound) = bound else {
        return (value, 0);
    };
    let Value::Array(entries) = value else {
        return (value, 0);
    };

    if entries.len() <= bound {
        return (Value::Array(entries), 0);
    }

    let dropped = entries.len() - bound;
    let kept: Vec<Value> = entries.into_iter().skip(dropped).collect();
    (Value::Array(kept), dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierBConfig;
    use crate::tier_b::RecordStore;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    async fn engine(dir: &TempDir, capacity: u64) -> (Migrator, Arc<LocalStore>) {
        let tier_a = Arc::new(LocalStore::new(dir.path().join("tier_a"), capacity));
        let tier_b = RecordStore::open(dir.path().join("tier_b"), &TierBConfig::default())
            .await
            .unwrap();
        let migrator = Migrator::load(
            tier_a.clone(),
            tier_b as Arc<dyn RecordBackend>,
            RetentionConfig::default(),
        )
        .await
        .unwrap();
        (migrator, tier_a)
    }

    fn messages(n: usize) -> Value {
        let entries: Vec<Value> = (0..n)
            .map(|i| json!({"id": i, "sender": "a", "content": format!("m{i}")}))
            .collect();
        Value::Array(entries)
    }

    #[test]
    fn test_truncate_keeps_newest_in_order() {
        let (value, dropped) = truncate_entries(json!([1, 2, 3, 4, 5]), Some(3));
        assert_eq!(value, json!([3, 4, 5]));
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_truncate_below_bound_is_noop() {
        let (value, dropped) = truncate_entries(json!([1, 2]), Some(5));
        assert_eq!(value, json!([1, 2]));
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_truncate_unbounded_and_non_array() {
        assert_eq!(truncate_entries(json!([1, 2]), None).1, 0);
        assert_eq!(truncate_entries(json!("scalar"), Some(1)).1, 0);
    }

    #[tokio::test]
    async fn test_migrate_moves_and_deletes() {
        let dir = TempDir::new().unwrap();
        let (migrator, tier_a) = engine(&dir, 1024 * 1024).await;

        let ns = Namespace::classify("chat_messages_alice");
        tier_a.set("chat_messages_alice", &messages(10)).unwrap();

        let outcome = migrator.migrate(&ns).await.unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                entries: 10,
                dropped: 0
            }
        );

        assert!(!tier_a.contains("chat_messages_alice"));
        assert_eq!(migrator.tier_for("chat_messages_alice").await, Some(Tier::B));
    }

    #[tokio::test]
    async fn test_migrate_truncates_to_bound() {
        let dir = TempDir::new().unwrap();
        let (migrator, tier_a) = engine(&dir, 1024 * 1024).await;

        let ns = Namespace::Feed;
        tier_a.set(&ns.key(), &messages(250)).unwrap();

        let outcome = migrator.migrate(&ns).await.unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                entries: 200,
                dropped: 50
            }
        );
    }

    #[tokio::test]
    async fn test_migrate_absent_namespace() {
        let dir = TempDir::new().unwrap();
        let (migrator, _tier_a) = engine(&dir, 1024).await;

        let ns = Namespace::classify("chat_messages_ghost");
        let outcome = migrator.migrate(&ns).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::NothingToMigrate);
    }

    #[tokio::test]
    async fn test_duplicate_migration_is_noop() {
        let dir = TempDir::new().unwrap();
        let (migrator, tier_a) = engine(&dir, 1024 * 1024).await;

        let ns = Namespace::classify("chat_messages_x");
        tier_a.set(&ns.key(), &messages(3)).unwrap();

        migrator.migrate(&ns).await.unwrap();
        let second = migrator.migrate(&ns).await.unwrap();
        assert_eq!(second, MigrationOutcome::AlreadyMigrated);
    }

    #[tokio::test]
    async fn test_descriptors_survive_reload() {
        let dir = TempDir::new().unwrap();
        {
            let (migrator, tier_a) = engine(&dir, 1024 * 1024).await;
            let ns = Namespace::classify("group_messages_g");
            tier_a.set(&ns.key(), &messages(2)).unwrap();
            migrator.migrate(&ns).await.unwrap();
        }

        let (migrator, _tier_a) = engine(&dir, 1024 * 1024).await;
        assert_eq!(migrator.tier_for("group_messages_g").await, Some(Tier::B));
        assert!(migrator
            .known_collections()
            .await
            .contains(&"group_messages".to_string()));
    }

    /// Backend whose writes always fail, for migration failure semantics.
    struct FailingBackend;

    #[async_trait]
    impl RecordBackend for FailingBackend {
        async fn get(&self, _: &str, _: &str) -> Result<Option<Record>> {
            Ok(None)
        }
        async fn put(&self, _: &str, _: &Record) -> Result<()> {
            Err(StratumError::Unavailable("put timed out".to_string()))
        }
        async fn get_all(&self, _: &str) -> Result<Vec<Record>> {
            Ok(Vec::new())
        }
        async fn delete(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn clear(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_migration_leaves_tier_a_untouched() {
        let dir = TempDir::new().unwrap();
        let tier_a = Arc::new(LocalStore::new(dir.path().join("tier_a"), 1024 * 1024));
        let migrator = Migrator::load(
            tier_a.clone(),
            Arc::new(FailingBackend),
            RetentionConfig::default(),
        )
        .await
        .unwrap();

        let ns = Namespace::classify("chat_messages_keep");
        tier_a.set(&ns.key(), &messages(5)).unwrap();

        let err = migrator.migrate(&ns).await.unwrap_err();
        assert!(matches!(err, StratumError::Migration { .. }));

        // Source of truth is intact and still routed to tier A.
        assert_eq!(tier_a.get(&ns.key()).unwrap(), Some(messages(5)));
        assert_eq!(migrator.tier_for(&ns.key()).await, None);
    }

    #[tokio::test]
    async fn test_migrate_all_sweeps_collections_only() {
        let dir = TempDir::new().unwrap();
        let (migrator, tier_a) = engine(&dir, 1024 * 1024).await;

        tier_a.set("chat_messages_a", &messages(2)).unwrap();
        tier_a.set("group_messages_b", &messages(3)).unwrap();
        tier_a.set("apiSettings", &json!({"theme": "dark"})).unwrap();

        let report = migrator.migrate_all().await;
        assert_eq!(report.migrated, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.entries, 5);

        // Scalars stay in tier A.
        assert!(tier_a.contains("apiSettings"));
    }

    #[tokio::test]
    async fn test_compact_namespace_in_tier_a() {
        let dir = TempDir::new().unwrap();
        let (migrator, tier_a) = engine(&dir, 1024 * 1024).await;

        let ns = Namespace::classify("chat_messages_c");
        tier_a
            .set(
                &ns.key(),
                &json!([{"id": 1, "sender": "a", "content": "hi", "cached": "zzz"}]),
            )
            .unwrap();

        migrator.compact_namespace(&ns).await.unwrap();

        let value = tier_a.get(&ns.key()).unwrap().unwrap();
        assert!(value[0].get("cached").is_none());
        assert_eq!(value[0]["content"], json!("hi"));
    }
}
