use anyhow::Result;
use clap::Args;
use plenum_core::checker::{Checker, CheckerConfig, MigrationMode, Mode};
use plenum_core::registry::ModelRegistry;
use plenum_core::timing::timed;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::ModeArg;
use crate::output::{OutputMode, render_mode};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Snapshot files to check.
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Check as a meeting import: references must not leave the meeting.
    #[arg(long)]
    pub import: bool,

    /// Override the configured checker mode.
    #[arg(long, value_enum, conflicts_with = "import")]
    pub mode: Option<ModeArg>,

    /// Accept snapshots at an older migration index.
    #[arg(long)]
    pub permissive: bool,

    /// Drop configured fields and fill defaults before checking.
    #[arg(long)]
    pub repair: bool,
}

impl CheckArgs {
    fn checker_config(&self, configured: &CheckerConfig) -> CheckerConfig {
        let mut config = configured.clone();
        if self.import {
            config.mode = Mode::External;
        } else if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if self.permissive {
            config.migration_mode = MigrationMode::Permissive;
        }
        config.repair |= self.repair;
        config
    }
}

#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    ok: bool,
    errors: Vec<String>,
}

fn check_file(checker: &Checker<'_>, path: &Path) -> FileReport {
    let errors = match std::fs::read_to_string(path) {
        Err(err) => vec![format!("Cannot read file: {err}")],
        Ok(source) => match serde_json::from_str(&source) {
            Err(err) => vec![format!("Invalid JSON: {err}")],
            Ok(value) => timed("check", || checker.check_json(value))
                .err()
                .map(|failure| failure.errors)
                .unwrap_or_default(),
        },
    };
    tracing::debug!(file = %path.display(), errors = errors.len(), "file checked");
    FileReport {
        file: path.display().to_string(),
        ok: errors.is_empty(),
        errors,
    }
}

/// Check every file; `Ok(false)` if any of them is invalid.
pub fn run_check(
    args: &CheckArgs,
    configured: &CheckerConfig,
    registry: &ModelRegistry,
    output: OutputMode,
) -> Result<bool> {
    let checker = Checker::new(registry, args.checker_config(configured));
    let reports: Vec<FileReport> = args
        .files
        .iter()
        .map(|path| check_file(&checker, path))
        .collect();

    render_mode(
        output,
        &reports,
        |reports, w| {
            for report in reports {
                writeln!(w, "{}\t{}", report.file, if report.ok { "ok" } else { "invalid" })?;
                for error in &report.errors {
                    writeln!(w, "\t{error}")?;
                }
            }
            Ok(())
        },
        |reports, w| {
            for report in reports {
                if report.ok {
                    writeln!(w, "✓ {}: Datastore is valid", report.file)?;
                } else {
                    writeln!(
                        w,
                        "✗ {}: Datastore is corrupt ({} errors)",
                        report.file,
                        report.errors.len()
                    )?;
                    for error in &report.errors {
                        writeln!(w, "\t{error}")?;
                    }
                }
            }
            Ok(())
        },
    )?;
    Ok(reports.iter().all(|report| report.ok))
}
