// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! Defines all command-line arguments and subcommands for Stratum.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stratum - tiered key/value persistence store
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(version, about = "Tiered key/value persistence store")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (defaults to ~/.stratum/data)
    #[arg(short = 'd', long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read a key and print its value
    Get(GetArgs),

    /// Write a key from a JSON argument or stdin
    Set(SetArgs),

    /// Remove a key from every tier
    Remove(GetArgs),

    /// Show usage of both storage tiers
    Stats,

    /// Move namespaces from tier A to tier B
    Migrate(MigrateArgs),

    /// Emergency sweep: aggressive migration with tightened retention
    Cleanup,

    /// Strip auxiliary fields from a namespace's stored entries
    Compact(CompactArgs),

    /// Delete everything in every tier
    Clear(ClearArgs),

    /// Watch a key and print each change as it happens
    Watch(WatchArgs),
}

/// Arguments for get/remove
#[derive(clap::Args, Debug)]
pub struct GetArgs {
    /// Storage key, e.g. "chat_messages_alice"
    pub key: String,
}

/// Arguments for the set subcommand
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Storage key
    pub key: String,

    /// JSON value; reads stdin when omitted
    pub value: Option<String>,
}

/// Arguments for the migrate subcommand
#[derive(clap::Args, Debug)]
pub struct MigrateArgs {
    /// Migrate one namespace key instead of sweeping all of them
    pub key: Option<String>,

    /// Sweep every collection namespace held in tier A
    #[arg(long, conflicts_with = "key")]
    pub all: bool,
}

/// Arguments for the compact subcommand
#[derive(clap::Args, Debug)]
pub struct CompactArgs {
    /// Namespace key to compact
    pub key: String,
}

/// Arguments for the clear subcommand
#[derive(clap::Args, Debug)]
pub struct ClearArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the watch subcommand
#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    /// Key to watch
    pub key: String,

    /// Poll interval in milliseconds (overrides config)
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

/// Output format selection
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get() {
        let cli = Cli::try_parse_from(["stratum", "get", "feed_posts"]).unwrap();
        match cli.command {
            Commands::Get(args) => assert_eq!(args.key, "feed_posts"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_migrate_all() {
        let cli = Cli::try_parse_from(["stratum", "migrate", "--all"]).unwrap();
        match cli.command {
            Commands::Migrate(args) => {
                assert!(args.all);
                assert!(args.key.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_migrate_key_conflicts_with_all() {
        assert!(Cli::try_parse_from(["stratum", "migrate", "chat_messages_a", "--all"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["stratum", "-v", "--format", "json", "stats"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Stats));
    }
}
