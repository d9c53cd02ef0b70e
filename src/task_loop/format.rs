//! Formatting functions for task loop output.
//!
//! Pure functions returning strings; callers decide whether to print.

use colored::Colorize;
use std::fmt::Write;

use super::{Attempt, TaskRun, TaskStatus};
use crate::sandbox::OutcomeKind;

/// Banner information for display when a task starts.
#[derive(Debug, Clone)]
pub(crate) struct BannerInfo {
    pub task: String,
    pub generator: String,
    pub backend: String,
    pub max_attempts: usize,
}

/// Formats the startup banner for display.
pub(crate) fn format_banner(info: &BannerInfo) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   🔄 sandloop task".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "  Task:       {}", info.task.cyan()).unwrap();
    writeln!(&mut out, "  Generator:  {}", info.generator.cyan().bold()).unwrap();
    writeln!(&mut out, "  Backend:    {}", info.backend.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Attempts:   {}",
        info.max_attempts.to_string().cyan()
    )
    .unwrap();
    write!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    out
}

/// Formats the attempt header line.
pub(crate) fn format_attempt_header(attempt: usize, max_attempts: usize) -> String {
    format!(
        "\n{} Attempt {}/{} {}",
        "━".repeat(18).dimmed(),
        attempt.to_string().cyan().bold(),
        max_attempts,
        "━".repeat(18).dimmed()
    )
}

/// Formats the result of one attempt, with the critique when there is one.
pub(crate) fn format_attempt_outcome(attempt: &Attempt) -> String {
    let mut out = String::new();
    let outcome = &attempt.outcome;
    let icon = match outcome.kind {
        OutcomeKind::Passed => "✅".green(),
        OutcomeKind::Skipped => "⏭️".yellow(),
        OutcomeKind::Failed(_) => "❌".red(),
    };
    write!(&mut out, "  {icon} {}", outcome.summary()).unwrap();

    if !outcome.stdout.trim().is_empty() {
        write!(&mut out, "\n  {}", "Output:".dimmed()).unwrap();
        for line in outcome.stdout.lines().take(10) {
            write!(&mut out, "\n    {line}").unwrap();
        }
    }

    if let Some(critique) = attempt.critique.as_deref() {
        write!(&mut out, "\n  {}", "Reviewer:".yellow()).unwrap();
        for line in critique.lines().take(6) {
            write!(&mut out, "\n    {}", line.dimmed()).unwrap();
        }
    }

    out
}

/// Formats a task result code with its color.
pub(crate) fn format_status(status: TaskStatus) -> String {
    match status {
        TaskStatus::Passed => "passed".green().bold().to_string(),
        TaskStatus::Failed => "failed".red().bold().to_string(),
        TaskStatus::Unsafe => "unsafe".magenta().bold().to_string(),
    }
}

/// Formats the closing summary of a task run.
pub(crate) fn format_task_finished(run: &TaskRun) -> String {
    let mut out = String::new();
    let icon = if run.final_passed {
        "🎉".green()
    } else {
        "🛑".red()
    };
    writeln!(
        &mut out,
        "\n{icon} Task {} after {} attempt(s).",
        format_status(run.status()),
        run.attempts.len()
    )
    .unwrap();
    write!(
        &mut out,
        "  Best attempt: {}",
        (run.best_attempt_index + 1).to_string().cyan()
    )
    .unwrap();
    if !run.final_passed {
        if let Some(critique) = run.last_critique() {
            let first = critique.lines().next().unwrap_or_default();
            write!(&mut out, "\n  Last critique: {}", first.dimmed()).unwrap();
        }
    }
    out
}
