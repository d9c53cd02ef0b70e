//! `sandloop session`: every task in a file, in order, with shared context.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::Path;

use crate::retry::RetryPolicy;
use crate::session::format::{format_finalized, format_session_summary};
use crate::session::{finalize, parse_tasks, run_session};

use super::{build_documenter, build_task_loop, load_config, resolve_backend};

/// Runs the session and returns the exit code for its worst task.
pub(crate) async fn run(tasks_file: &Path, with_finalize: bool) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = load_config(&cwd)?;

    let text = std::fs::read_to_string(tasks_file)
        .with_context(|| format!("Failed to read tasks file: {}", tasks_file.display()))?;
    let tasks = parse_tasks(&text);
    if tasks.is_empty() {
        bail!(
            "No tasks found in {}\nWrite one task per line; lines starting with # are ignored.",
            tasks_file.display()
        );
    }

    let backend = resolve_backend(&config, None)?;
    let task_loop = build_task_loop(&config, backend, None)?.with_progress(true);

    println!(
        "\n{} {} task(s) from {}",
        "▶".cyan(),
        tasks.len(),
        tasks_file.display()
    );

    let (record, context) = run_session(&task_loop, &tasks, config.task.max_attempts).await;
    record.save(&cwd)?;

    println!("\n{}", format_session_summary(&record));

    if with_finalize {
        let documenter = build_documenter(&config, None)?;
        let retry = RetryPolicy::from_config(&config.retry);
        let done = finalize(&documenter, &retry, &record, &context, &cwd).await?;
        println!("\n{}", format_finalized(&done));
    }

    Ok(record.overall_status().exit_code())
}
