// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Record and entry model
//!
//! Values flow through the engine as JSON. Collections are ordered arrays of
//! entry objects; message entries carry a small fixed contract (identity,
//! sender, displayable content, timestamp, kind) plus arbitrary extra fields
//! that UI layers attach. Compaction strips the extras from long-lived
//! entries without touching the contract fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::namespace::Namespace;

/// A record as stored in a tier-B collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Primary key within the collection (the flat storage key)
    pub key: String,
    /// The stored value
    pub value: Value,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            updated_at: Utc::now(),
        }
    }
}

/// One entry of a message log. Unknown fields are preserved through the
/// flattened `extra` map so a round-trip never loses data the UI wrote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEntry {
    /// Entry identity (numeric or string, both occur)
    pub id: Value,
    /// Who produced the entry
    pub sender: String,
    /// Displayable content
    pub content: String,
    /// Unix-millis timestamp, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Entry kind ("text", "image", "system", ...)
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Derived or cached fields attached by consumers; recomputable, and the
    /// first thing compaction drops
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_kind() -> String {
    "text".to_string()
}

impl MessageEntry {
    /// Drop every field outside the minimal contract.
    pub fn compact(&mut self) {
        self.extra.clear();
    }
}

/// Strip redundant fields from every message-shaped entry of a collection
/// value. Entries that do not parse as messages pass through untouched, so
/// compaction never loses entry identity or ordering.
pub fn compact_collection(namespace: &Namespace, value: &Value) -> Value {
    // Field stripping is only defined for message logs; other collections
    // keep their entries whole.
    if !matches!(namespace, Namespace::Conversation(_) | Namespace::Group(_)) {
        return value.clone();
    }

    let Some(entries) = value.as_array() else {
        return value.clone();
    };

    let compacted: Vec<Value> = entries
        .iter()
        .map(|entry| {
            match serde_json::from_value::<MessageEntry>(entry.clone()) {
                Ok(mut msg) => {
                    msg.compact();
                    // A contract-conforming entry always serializes back.
                    serde_json::to_value(msg).unwrap_or_else(|_| entry.clone())
                }
                Err(_) => entry.clone(),
            }
        })
        .collect();

    Value::Array(compacted)
}
