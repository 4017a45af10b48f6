// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Stratum - tiered key/value persistence for chat-style application data.
//!
//! This crate exposes the storage runtime used by:
//! - the `stratum` CLI (`src/main.rs`)
//! - applications embedding [`facade::UnifiedStore`] as a library
//!
//! Architecture highlights:
//! - `tier_a`: small synchronous store with a hard byte quota
//! - `tier_b`: large asynchronous record store with schema versioning
//! - `facade`: unified read/write surface with a TTL memory cache
//! - `migrate`: tier-A to tier-B migration, retention and compaction
//! - `observer`: shared-timer change observation over tier-A keys
//! - `recovery`: emergency sweeps and usage reporting

pub mod cli;
pub mod config;
pub mod error;
pub mod facade;
pub mod migrate;
pub mod namespace;
pub mod observer;
pub mod record;
pub mod recovery;
pub mod tier_a;
pub mod tier_b;

pub use error::{Result, StratumError};
pub use facade::UnifiedStore;
