//! Formatting functions for session output.

use colored::Colorize;
use std::fmt::Write;

use super::{Finalized, SessionRecord};
use crate::task_loop::format::format_status;
use crate::task_loop::TaskStatus;

/// One line per task plus totals.
pub(crate) fn format_session_summary(record: &SessionRecord) -> String {
    let mut out = String::new();

    writeln!(&mut out, "{}", "Session".bold()).unwrap();
    writeln!(&mut out, "  Request:   {}", record.prompt.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Started:   {}",
        record.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
    .unwrap();
    match record.finished_at {
        Some(finished) => {
            let secs = (finished - record.started_at).num_seconds();
            writeln!(&mut out, "  Duration:  {secs}s").unwrap();
        }
        None => writeln!(&mut out, "  Duration:  {}", "unfinished".yellow()).unwrap(),
    }

    for (i, task) in record.tasks.iter().enumerate() {
        write!(
            &mut out,
            "\n  {}. [{}] {} ({} attempt(s))",
            i + 1,
            format_status(task.status),
            task.task_description,
            task.attempt_count
        )
        .unwrap();
        if task.status != TaskStatus::Passed {
            if !task.outcome_summary.is_empty() {
                write!(&mut out, "\n     {}", task.outcome_summary.dimmed()).unwrap();
            }
            if let Some(first) = task.critique.lines().next() {
                write!(&mut out, "\n     Critique: {}", first.dimmed()).unwrap();
            }
        }
    }

    write!(
        &mut out,
        "\n\n  {} passed, {} failed, {} unsafe",
        record.count(TaskStatus::Passed).to_string().green(),
        record.count(TaskStatus::Failed).to_string().red(),
        record.count(TaskStatus::Unsafe).to_string().magenta()
    )
    .unwrap();

    out
}

/// Paths written by finalize, marking placeholders.
pub(crate) fn format_finalized(done: &Finalized) -> String {
    let mark = |generated: bool| {
        if generated {
            "✓".green()
        } else {
            "placeholder".yellow()
        }
    };
    format!(
        "  Tests:   {} {}\n  README:  {} {}",
        done.tests_path.display(),
        mark(done.tests_generated),
        done.readme_path.display(),
        mark(done.readme_generated)
    )
}
