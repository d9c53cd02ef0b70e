//! `sandloop exec`: run one artifact file through the coordinator.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::artifact::Artifact;
use crate::coordinator::Coordinator;
use crate::sandbox::{BackendKind, ExecutionOutcome, FailureKind, OutcomeKind};
use crate::task_loop::TaskStatus;

use super::{load_config, resolve_backend};

/// Executes `file` and returns the process exit code.
pub(crate) async fn run(
    file: &Path,
    backend: Option<BackendKind>,
    timeout_seconds: Option<u64>,
    json: bool,
) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = load_config(&cwd)?;

    let backend = resolve_backend(&config, backend)?;
    let mut limits = config.limits();
    if let Some(secs) = timeout_seconds.filter(|s| *s > 0) {
        limits.timeout = Duration::from_secs(secs);
    }

    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read artifact: {}", file.display()))?;
    let artifact = Artifact::from_source(&raw);

    info!("Executing {} on {}", file.display(), backend);
    let outcome = Coordinator::from_config(&config)
        .run(&artifact, &limits, backend)
        .await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?
        );
    } else {
        println!("{}", format_outcome(&outcome));
    }

    Ok(exit_code(&outcome))
}

/// 0 on a pass, 2 when the safety policy blocked it, 1 otherwise.
fn exit_code(outcome: &ExecutionOutcome) -> i32 {
    let status = match outcome.kind {
        OutcomeKind::Passed => TaskStatus::Passed,
        OutcomeKind::Failed(FailureKind::SafetyViolation) => TaskStatus::Unsafe,
        _ => TaskStatus::Failed,
    };
    status.exit_code()
}

fn format_outcome(outcome: &ExecutionOutcome) -> String {
    let mut out = String::new();
    let icon = match outcome.kind {
        OutcomeKind::Passed => "✅".green(),
        OutcomeKind::Skipped => "⏭️".yellow(),
        OutcomeKind::Failed(_) => "❌".red(),
    };
    write!(&mut out, "{icon} {}", outcome.summary()).unwrap();

    if !outcome.stdout.is_empty() {
        write!(&mut out, "\n{}\n{}", "Output:".dimmed(), outcome.stdout.trim_end()).unwrap();
    }
    if outcome.truncated {
        write!(&mut out, "\n{}", "(output truncated)".yellow()).unwrap();
    }
    if let Some(message) = outcome.error_message.as_deref() {
        if !outcome.succeeded {
            write!(&mut out, "\n{}\n{}", "Error:".red(), message.trim_end()).unwrap();
        }
    }
    if let Some(code) = outcome.exit_code {
        write!(&mut out, "\n{} {code}", "Exit code:".dimmed()).unwrap();
    }

    out
}
