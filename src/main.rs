use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod agent;
mod artifact;
mod commands;
mod config;
mod coordinator;
mod retry;
mod safety;
mod sandbox;
mod session;
mod task_loop;
mod templates;

use sandbox::BackendKind;

#[derive(Parser)]
#[command(name = "sandloop")]
#[command(
    author,
    version,
    about = "Run untrusted generated code in isolation and retry it with review feedback"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write logs to this file
    #[arg(long, global = true, env = "SANDLOOP_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write sandloop.toml and an example tasks.txt
    Init {
        /// Force overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Print the safety verdict for a file without running it
    Check {
        /// Artifact to inspect
        file: PathBuf,
    },

    /// Run a file through an isolation backend
    Exec {
        /// Artifact to run
        file: PathBuf,

        /// Isolation backend (default: [execution].method)
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,

        /// Timeout in seconds (default: [execution].timeout_seconds)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate, run and revise code for one task
    Run {
        /// What the program should do
        description: String,

        /// Generator calls for this task (default: [task].max_attempts)
        #[arg(short = 'n', long)]
        max_attempts: Option<usize>,

        /// Isolation backend (default: [execution].method)
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,

        /// Collaborator provider: http or command (overrides config)
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Run every task in a file, in order, with shared context
    Session {
        /// One task per line
        #[arg(default_value = commands::init::TASKS_FILE)]
        tasks_file: PathBuf,

        /// Also generate tests.py and README.md for the passing code
        #[arg(long)]
        finalize: bool,
    },

    /// Show the last session record
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _guard = init_logging(cli.verbose, cli.log_json, cli.log_file.as_deref())?;

    let code = match cli.command {
        Commands::Init { force } => {
            commands::init::run(force)?;
            0
        }
        Commands::Check { file } => commands::check::run(&file)?,
        Commands::Exec {
            file,
            backend,
            timeout,
            json,
        } => commands::exec::run(&file, backend, timeout, json).await?,
        Commands::Run {
            description,
            max_attempts,
            backend,
            provider,
        } => {
            commands::run::run(&description, max_attempts, backend, provider.as_deref()).await?
        }
        Commands::Session {
            tasks_file,
            finalize,
        } => commands::session::run(&tasks_file, finalize).await?,
        Commands::Status => {
            commands::status::run()?;
            0
        }
    };

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

/// Console logs go to stderr so command output on stdout stays clean.
/// The returned guard flushes the file writer on drop.
fn init_logging(verbose: bool, json: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_filter = if verbose {
        "sandloop=debug"
    } else {
        "sandloop=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}
