// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Emergency recovery
//!
//! An explicit, operator-invoked sweep for when tier A is at or near its
//! quota: every conversation, group and feed namespace still held in tier A
//! is migrated to tier B under aggressive retention bounds, tighter than
//! the normal ones. The sweep never runs on its own and one failing
//! namespace never stops the rest.

use serde::Serialize;

use crate::error::Result;
use crate::facade::UnifiedStore;
use crate::migrate::MigrationOutcome;
use crate::namespace::Namespace;
use crate::tier_a::StorageUsage;

/// Outcome of an emergency sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Namespaces moved to tier B
    pub migrated: usize,
    /// Namespaces that failed and were left in tier A
    pub failed: usize,
    /// Entries surviving in the migrated namespaces
    pub entries_kept: usize,
    /// Entries dropped by aggressive retention
    pub entries_dropped: usize,
    /// Tier-A footprint before the sweep, in bytes
    pub tier_a_before: u64,
    /// Tier-A footprint after the sweep, in bytes
    pub tier_a_after: u64,
}

impl RecoveryReport {
    pub fn freed_bytes(&self) -> u64 {
        self.tier_a_before.saturating_sub(self.tier_a_after)
    }
}

/// Combined usage snapshot of both tiers.
#[derive(Debug, Clone, Serialize)]
pub struct StorageReport {
    pub tier_a: StorageUsage,
    /// None when the store runs degraded without tier B
    pub tier_b: Option<TierBUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierBUsage {
    pub used_bytes: u64,
    /// Record counts per known collection
    pub collections: Vec<(String, usize)>,
}

/// Migrate every large collection namespace (chat, group, feed) out of
/// tier A under aggressive retention bounds. Smaller collections and
/// scalars are the normal sweep's business, not the emergency path's.
pub async fn emergency_cleanup(store: &UnifiedStore) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        tier_a_before: store.tier_a().used_bytes(),
        ..Default::default()
    };

    let Some(migrator) = store.migrator() else {
        tracing::error!("emergency cleanup needs tier B, which is unavailable");
        report.tier_a_after = report.tier_a_before;
        return Ok(report);
    };

    let retention = migrator.retention().clone();
    for key in store.tier_a().keys() {
        let namespace = Namespace::classify(&key);
        if !namespace.is_large_collection() {
            continue;
        }

        let bound = namespace.aggressive_bound(&retention);
        match migrator.migrate_with_bound(&namespace, bound).await {
            Ok(MigrationOutcome::Migrated { entries, dropped }) => {
                report.migrated += 1;
                report.entries_kept += entries;
                report.entries_dropped += dropped;
                tracing::info!(namespace = %key, entries, dropped, "emergency migration done");
            }
            Ok(_) => {}
            Err(e) => {
                report.failed += 1;
                tracing::warn!(namespace = %key, error = %e, "emergency migration failed");
            }
        }
    }

    store.purge_expired_cache();
    report.tier_a_after = store.tier_a().used_bytes();
    Ok(report)
}

/// Snapshot usage of both tiers for diagnostics.
pub async fn storage_report(store: &UnifiedStore) -> Result<StorageReport> {
    let tier_a = store.tier_a().usage();

    let tier_b = match (store.tier_b_store(), store.migrator()) {
        (Some(tier_b), Some(migrator)) => {
            let mut collections = Vec::new();
            for name in migrator.known_collections().await {
                let count = tier_b.keys(&name).await?.len();
                collections.push((name, count));
            }
            Some(TierBUsage {
                used_bytes: tier_b.used_bytes().await,
                collections,
            })
        }
        _ => None,
    };

    Ok(StorageReport { tier_a, tier_b })
}
