use anyhow::{Context, Result};
use clap::Args;
use plenum_core::config::MigrationConfig;
use plenum_core::migration::{MigrationRegistry, MigrationReport, Migrator};
use plenum_core::registry::ModelRegistry;
use plenum_core::store::FileEventStore;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Directory holding `events.json`.
    #[arg(long, value_name = "DIR")]
    pub log: PathBuf,

    /// Migration index to stop at (defaults to the latest).
    #[arg(long, value_name = "N")]
    pub target: Option<u64>,
}

#[derive(Args, Debug)]
pub struct FinalizeArgs {
    /// Directory holding `events.json`.
    #[arg(long, value_name = "DIR")]
    pub log: PathBuf,
}

fn migrator<'a>(registry: &'a ModelRegistry, config: &MigrationConfig) -> Result<Migrator<'a>> {
    let migrations = MigrationRegistry::builtin().context("Built-in migrations are invalid")?;
    Ok(Migrator::new(registry, migrations).with_lock_timeout(config.lock_timeout()))
}

fn open_store(log: &Path) -> Result<FileEventStore> {
    FileEventStore::open(log).with_context(|| format!("Failed to open event log in {}", log.display()))
}

pub fn run_migrate(
    args: &MigrateArgs,
    config: &MigrationConfig,
    registry: &ModelRegistry,
    output: OutputMode,
) -> Result<()> {
    let mut store = open_store(&args.log)?;
    let mut migrator = migrator(registry, config)?;
    let target = args.target.unwrap_or_else(|| migrator.latest());
    let report = migrator
        .migrate_to(&mut store, target)
        .with_context(|| format!("Migration of {} failed", args.log.display()))?;
    render_report(&report, output)
}

pub fn run_finalize(
    args: &FinalizeArgs,
    config: &MigrationConfig,
    registry: &ModelRegistry,
    output: OutputMode,
) -> Result<()> {
    let mut store = open_store(&args.log)?;
    let report = migrator(registry, config)?
        .finalize(&mut store)
        .with_context(|| format!("Finalizing {} failed", args.log.display()))?;
    render_report(&report, output)
}

fn render_report(report: &MigrationReport, output: OutputMode) -> Result<()> {
    render_mode(
        output,
        report,
        |report, w| {
            writeln!(
                w,
                "{}\t{}\t{}\t{}",
                report.from,
                report.to,
                report.applied.join(","),
                if report.verified { "verified" } else { "unverified" }
            )
        },
        |report, w| {
            if report.is_noop() {
                return writeln!(
                    w,
                    "Event log is already at migration index {}",
                    report.to
                );
            }
            pretty_section(w, "Migration")?;
            pretty_kv(w, "From", report.from.to_string())?;
            pretty_kv(w, "To", report.to.to_string())?;
            pretty_kv(w, "Applied", report.applied.join(", "))?;
            pretty_kv(w, "Positions", report.positions.to_string())?;
            pretty_kv(w, "Verified", if report.verified { "yes" } else { "no" })
        },
    )
}
