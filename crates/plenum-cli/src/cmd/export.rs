use anyhow::{Context, Result};
use clap::Args;
use plenum_core::checker::{CheckerConfig, Mode};
use plenum_core::config::MigrationConfig;
use plenum_core::migration::{MigrationRegistry, Migrator};
use plenum_core::registry::ModelRegistry;
use plenum_core::store::FileEventStore;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use super::ModeArg;
use crate::output::{OutputMode, render_mode};

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Directory holding `events.json`.
    #[arg(long, value_name = "DIR")]
    pub log: PathBuf,

    /// Write the snapshot here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Checker mode for the exported snapshot.
    #[arg(long, value_enum, default_value = "all")]
    pub mode: ModeArg,
}

#[derive(Debug, Serialize)]
struct ExportSummary {
    output: String,
    migration_index: Option<u64>,
    instances: usize,
}

pub fn run_export(
    args: &ExportArgs,
    checker: &CheckerConfig,
    migration: &MigrationConfig,
    registry: &ModelRegistry,
    output: OutputMode,
) -> Result<()> {
    let store = FileEventStore::open(&args.log)
        .with_context(|| format!("Failed to open event log in {}", args.log.display()))?;
    let migrator = Migrator::new(registry, MigrationRegistry::builtin()?)
        .with_lock_timeout(migration.lock_timeout());
    let config = checker.clone().with_mode(Mode::from(args.mode));
    let snapshot = migrator
        .export(&store, config)
        .with_context(|| format!("Export of {} failed", args.log.display()))?;
    let json = serde_json::to_string_pretty(&snapshot.to_value())?;

    let Some(path) = &args.output else {
        println!("{json}");
        return Ok(());
    };
    std::fs::write(path, format!("{json}\n"))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    let summary = ExportSummary {
        output: path.display().to_string(),
        migration_index: snapshot.migration_index(),
        instances: snapshot.len(),
    };
    render_mode(
        output,
        &summary,
        |summary, w| writeln!(w, "{}\t{}", summary.output, summary.instances),
        |summary, w| {
            writeln!(
                w,
                "✓ Exported {} instances at migration index {} to {}",
                summary.instances,
                summary.migration_index.unwrap_or_default(),
                summary.output
            )
        },
    )
}
