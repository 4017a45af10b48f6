// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tier-B schema versioning
//!
//! The schema version is an integer stamped on the store. Opening a store
//! with an older version triggers a one-time structural upgrade (creating the
//! record collections the new version introduces) before any read or write is
//! allowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version. v1 shipped messages/settings/meta; v2 added the
/// group, feed and emoji collections.
pub const SCHEMA_VERSION: u32 = 2;

/// Collections that exist at a given schema version.
pub fn collections_for(version: u32) -> &'static [&'static str] {
    match version {
        0 | 1 => &["messages", "settings", "meta"],
        _ => &[
            "messages",
            "settings",
            "meta",
            "group_messages",
            "feed",
            "emoji",
        ],
    }
}

/// Collections of the current schema version.
pub fn builtin_collections() -> &'static [&'static str] {
    collections_for(SCHEMA_VERSION)
}

/// Persisted schema marker, stored as `schema.json` in the tier-B directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaInfo {
    /// Version the on-disk layout conforms to
    pub version: u32,
    /// When this version was stamped
    pub upgraded_at: DateTime<Utc>,
}

impl SchemaInfo {
    /// Marker for the current version, stamped now.
    pub fn current() -> Self {
        Self {
            version: SCHEMA_VERSION,
            upgraded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_collections_subset_of_v2() {
        let v1 = collections_for(1);
        let v2 = collections_for(2);
        for c in v1 {
            assert!(v2.contains(c), "v2 must keep v1 collection {c}");
        }
        assert!(v2.len() > v1.len());
    }

    #[test]
    fn test_builtin_collections_current() {
        assert_eq!(builtin_collections(), collections_for(SCHEMA_VERSION));
        assert!(builtin_collections().contains(&"meta"));
        assert!(builtin_collections().contains(&"feed"));
    }

    #[test]
    fn test_schema_info_current() {
        let info = SchemaInfo::current();
        assert_eq!(info.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_unknown_future_version_maps_to_latest_layout() {
        assert_eq!(collections_for(99), collections_for(SCHEMA_VERSION));
    }
}
