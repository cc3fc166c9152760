#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode};
use plenum_core::config::load_config;
use plenum_core::timing;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "plenum: datastore consistency checker and event log migrator",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit a timing report to stderr.
    #[arg(long, global = true)]
    timing: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format (overrides --json and PLENUM_FORMAT).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Config file (defaults to .plenum/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Check snapshot files",
        long_about = "Check JSON snapshots against the models. Exits 1 if any file is invalid.",
        after_help = "EXAMPLES:\n    # Check an export\n    plenum check export.json\n\n    # Check a meeting import\n    plenum check --import meeting.json"
    )]
    Check(cmd::check::CheckArgs),

    #[command(
        about = "Migrate an event log",
        long_about = "Apply pending migrations to the event log in DIR, up to --target or the latest index.",
        after_help = "EXAMPLES:\n    # Migrate to the latest index\n    plenum migrate --log data/\n\n    # Stop at index 3\n    plenum migrate --log data/ --target 3"
    )]
    Migrate(cmd::migrate::MigrateArgs),

    #[command(
        about = "Migrate to the latest index and verify",
        long_about = "Migrate the event log to the latest index and check the whole dataset."
    )]
    Finalize(cmd::migrate::FinalizeArgs),

    #[command(
        about = "Export an event log as a snapshot",
        after_help = "EXAMPLES:\n    # Write the checked snapshot to a file\n    plenum export --log data/ --output export.json"
    )]
    Export(cmd::export::ExportArgs),

    #[command(about = "List collections or the fields of one collection")]
    Models(cmd::models::ModelsArgs),

    #[command(
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    plenum completions bash"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("PLENUM_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "plenum=debug,plenum_core=debug,info"
        } else {
            "plenum=info,plenum_core=info,warn"
        })
    });

    let format = env::var("PLENUM_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// `Ok(false)` means the command ran but reported invalid data.
fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<bool> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        cmd::completions::run_completions(args.shell, &mut command)?;
        return Ok(true);
    }

    let project_root = env::current_dir()?;
    let config = load_config(cli.config.as_deref(), &project_root)?;
    let registry = timing::timed("registry.load", || cmd::load_registry(&config))?;

    match &cli.command {
        Commands::Check(args) => timing::timed("cmd.check", || {
            cmd::check::run_check(args, &config.checker, &registry, output)
        }),
        Commands::Migrate(args) => timing::timed("cmd.migrate", || {
            cmd::migrate::run_migrate(args, &config.migration, &registry, output)
        })
        .map(|()| true),
        Commands::Finalize(args) => timing::timed("cmd.finalize", || {
            cmd::migrate::run_finalize(args, &config.migration, &registry, output)
        })
        .map(|()| true),
        Commands::Export(args) => timing::timed("cmd.export", || {
            cmd::export::run_export(args, &config.checker, &config.migration, &registry, output)
        })
        .map(|()| true),
        Commands::Models(args) => {
            cmd::models::run_models(args, &registry, output).map(|()| true)
        }
        Commands::Completions(_) => Ok(true),
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let timing_enabled = cli.timing || timing::enabled_from_env();
    timing::set_enabled(timing_enabled);

    let output = output::resolve_output_mode(cli.format, cli.json);
    let result = run(&cli, output);

    if timing_enabled {
        let report = timing::take_report();
        if output.is_json() {
            eprintln!("{}", serde_json::to_string_pretty(&report.to_json())?);
        } else {
            eprint!("{}", report.render_table());
        }
    }

    match result {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::FAILURE),
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            output::render_error(output, &CliError::from(&err))?;
            Ok(ExitCode::FAILURE)
        }
    }
}
