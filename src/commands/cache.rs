/// `confgraph cache` command implementation
///
/// Inspects and cleans the persisted result snapshot (list, stats, clean).
use anyhow::{Context, Result};

use confgraph::config_discovery::load_config_with_discovery;
use confgraph::logging;
use confgraph::storage::SnapshotDir;

use crate::cli::{CacheArgs, CacheCommands};
use crate::cli_utils::{confgraph_prefix, format_bytes};
use crate::merger::merged_cache_dir;

pub fn cache(args: &CacheArgs) -> Result<()> {
    let file_config = load_config_with_discovery(args.config.as_deref())?;
    let log_level = file_config
        .as_ref()
        .map(|(_, config)| config.observability.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    logging::init(&log_level);

    let snapshot = SnapshotDir::new(merged_cache_dir(
        args,
        file_config.map(|(_, config)| config),
    ));

    match &args.command {
        CacheCommands::List { verbose } => list(&snapshot, *verbose),
        CacheCommands::Stats => stats(&snapshot),
        CacheCommands::Clean { target } => clean(&snapshot, target.as_deref()),
    }
}

/// List persisted records
fn list(snapshot: &SnapshotDir, verbose: bool) -> Result<()> {
    let records = snapshot
        .records()
        .context("Failed to list snapshot records")?;

    if records.is_empty() {
        println!("No cached results in {}.", snapshot.path().display());
        return Ok(());
    }

    println!("Cached results ({} records):", records.len());
    println!();

    for (_, record) in records {
        println!("  {}  {}", record.fingerprint, record.target);
        if verbose {
            println!(
                "    Created: {}",
                record.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!(
                "    Duration: {:.2}s",
                record.duration_ms as f64 / 1000.0
            );
        }
    }

    Ok(())
}

/// Show snapshot statistics
fn stats(snapshot: &SnapshotDir) -> Result<()> {
    let stats = snapshot
        .stats()
        .context("Failed to get snapshot statistics")?;

    println!("Snapshot Statistics");
    println!();
    println!("Directory: {}", snapshot.path().display());
    println!("Total records: {}", stats.total_records);
    println!("Total size: {}", format_bytes(stats.total_bytes));
    if stats.corrupt_records > 0 {
        println!("Corrupt records: {}", stats.corrupt_records);
    }

    if !stats.per_target.is_empty() {
        println!();
        println!("Records per target:");
        for (target, count) in &stats.per_target {
            println!("  {:>6}  {}", count, target);
        }
    }

    Ok(())
}

/// Delete all records, or only those of one target
fn clean(snapshot: &SnapshotDir, target: Option<&str>) -> Result<()> {
    match target {
        Some(target) => println!(
            "{} Cleaning cached results of {}...",
            confgraph_prefix(),
            target
        ),
        None => println!("{} Cleaning all cached results...", confgraph_prefix()),
    }

    let removed = snapshot
        .clean(target)
        .context("Failed to clean snapshot")?;

    println!("{} Removed {} records.", confgraph_prefix(), removed);
    Ok(())
}
