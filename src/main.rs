// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Stratum - tiered key/value persistence store
//!
//! Entry point for the Stratum CLI.

use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use stratum::cli::{
    Cli, ClearArgs, Commands, CompactArgs, GetArgs, MigrateArgs, OutputFormat, SetArgs, WatchArgs,
};
use stratum::config::Settings;
use stratum::namespace::Namespace;
use stratum::recovery;
use stratum::UnifiedStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // Practical debug toggle: `-v` enables storage diagnostics without
    // requiring users to know target names up front. `RUST_LOG` still takes
    // precedence.
    if cli.verbose > 0 {
        for directive in ["stratum=debug"] {
            if let Ok(parsed) = directive.parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path).context("loading config file")?,
        None => Settings::load().context("loading config")?,
    };
    if let Some(dir) = &cli.data_dir {
        settings.data_dir = Some(dir.clone());
    }
    if let Commands::Watch(args) = &cli.command {
        if let Some(interval_ms) = args.interval_ms {
            settings.observer.poll_interval_ms = interval_ms;
        }
    }

    let store = Arc::new(
        UnifiedStore::open(&settings)
            .await
            .context("opening storage")?,
    );

    match cli.command {
        Commands::Get(args) => run_get(&store, args, cli.format).await,
        Commands::Set(args) => run_set(&store, args).await,
        Commands::Remove(args) => run_remove(&store, args).await,
        Commands::Stats => run_stats(&store, cli.format).await,
        Commands::Migrate(args) => run_migrate(&store, args).await,
        Commands::Cleanup => run_cleanup(&store, cli.format).await,
        Commands::Compact(args) => run_compact(&store, args).await,
        Commands::Clear(args) => run_clear(&store, args).await,
        Commands::Watch(args) => run_watch(&store, args).await,
    }
}

async fn run_get(store: &Arc<UnifiedStore>, args: GetArgs, format: OutputFormat) -> Result<()> {
    match store.get(&args.key).await? {
        Some(value) => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(&value)?),
            OutputFormat::Text => println!("{}", serde_json::to_string_pretty(&value)?),
        },
        None => bail!("key not found: {}", args.key),
    }
    Ok(())
}

async fn run_set(store: &Arc<UnifiedStore>, args: SetArgs) -> Result<()> {
    let raw = match args.value {
        Some(value) => value,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading value from stdin")?;
            buffer
        }
    };
    let value: serde_json::Value =
        serde_json::from_str(raw.trim()).context("value is not valid JSON")?;

    store.set(&args.key, &value).await?;
    println!("ok");
    Ok(())
}

async fn run_remove(store: &Arc<UnifiedStore>, args: GetArgs) -> Result<()> {
    store.remove(&args.key).await?;
    println!("removed {}", args.key);
    Ok(())
}

async fn run_stats(store: &Arc<UnifiedStore>, format: OutputFormat) -> Result<()> {
    let report = recovery::storage_report(store).await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "tier A: {} / {} bytes ({:.1}%), {} keys",
        report.tier_a.used_bytes,
        report.tier_a.capacity_bytes,
        report.tier_a.percent(),
        report.tier_a.item_count,
    );
    for (key, size) in &report.tier_a.largest {
        println!("  {key}: {size} bytes");
    }

    match &report.tier_b {
        Some(tier_b) => {
            println!("tier B: {} bytes", tier_b.used_bytes);
            for (collection, count) in &tier_b.collections {
                println!("  {collection}: {count} records");
            }
        }
        None => println!("tier B: unavailable (running degraded)"),
    }
    Ok(())
}

async fn run_migrate(store: &Arc<UnifiedStore>, args: MigrateArgs) -> Result<()> {
    let Some(migrator) = store.migrator() else {
        bail!("tier B is unavailable, cannot migrate");
    };

    if let Some(key) = args.key {
        let namespace = Namespace::classify(&key);
        let outcome = migrator.migrate(&namespace).await?;
        println!("{outcome:?}");
        return Ok(());
    }

    if !args.all {
        bail!("pass a namespace key or --all");
    }

    let report = migrator.migrate_all().await;
    println!(
        "migrated {} namespaces ({} entries), {} failed",
        report.migrated, report.entries, report.failed,
    );
    Ok(())
}

async fn run_cleanup(store: &Arc<UnifiedStore>, format: OutputFormat) -> Result<()> {
    let report = recovery::emergency_cleanup(store).await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "migrated {} namespaces, {} failed",
        report.migrated, report.failed
    );
    println!(
        "kept {} entries, dropped {} by retention",
        report.entries_kept, report.entries_dropped
    );
    println!(
        "tier A: {} -> {} bytes (freed {})",
        report.tier_a_before,
        report.tier_a_after,
        report.freed_bytes(),
    );
    Ok(())
}

async fn run_compact(store: &Arc<UnifiedStore>, args: CompactArgs) -> Result<()> {
    let Some(migrator) = store.migrator() else {
        bail!("tier B is unavailable, cannot compact");
    };
    let namespace = Namespace::classify(&args.key);
    migrator.compact_namespace(&namespace).await?;
    println!("compacted {}", args.key);
    Ok(())
}

async fn run_clear(store: &Arc<UnifiedStore>, args: ClearArgs) -> Result<()> {
    if !args.yes {
        eprint!("delete ALL stored data? type 'yes' to confirm: ");
        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .context("reading confirmation")?;
        if answer.trim() != "yes" {
            println!("aborted");
            return Ok(());
        }
    }

    store.clear().await?;
    println!("cleared");
    Ok(())
}

async fn run_watch(store: &Arc<UnifiedStore>, args: WatchArgs) -> Result<()> {
    let key = args.key.clone();
    let _guard = store.observe(&args.key, move |value| match value {
        Some(value) => println!("{key} = {value}"),
        None => println!("{key} (absent)"),
    });

    eprintln!("watching {} (ctrl-c to stop)", args.key);
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    Ok(())
}
