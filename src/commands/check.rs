//! `sandloop check`: static safety verdict for one file, nothing executed.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::path::Path;

use crate::artifact::{Artifact, ArtifactClass};
use crate::task_loop::TaskStatus;

/// Prints the verdict and returns the process exit code.
pub(crate) fn run(file: &Path) -> Result<i32> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read artifact: {}", file.display()))?;
    let artifact = Artifact::from_source(&raw);

    println!("{}", format_check(file, &artifact));

    let status = if artifact.verdict().allowed {
        TaskStatus::Passed
    } else {
        TaskStatus::Unsafe
    };
    Ok(status.exit_code())
}

fn format_check(file: &Path, artifact: &Artifact) -> String {
    let mut out = String::new();
    let verdict = artifact.verdict();

    writeln!(&mut out, "{}", file.display().to_string().bold()).unwrap();
    if verdict.allowed {
        writeln!(&mut out, "  Safety:     {}", "allowed".green().bold()).unwrap();
    } else {
        writeln!(
            &mut out,
            "  Safety:     {} by rule '{}'",
            "blocked".red().bold(),
            verdict.violated_rule.as_deref().unwrap_or("unknown")
        )
        .unwrap();
        if let Some(message) = verdict.message.as_deref() {
            writeln!(&mut out, "              {}", message.dimmed()).unwrap();
        }
    }

    match artifact.incomplete_reason() {
        None => writeln!(&mut out, "  Structure:  {}", "complete".green()).unwrap(),
        Some(reason) => {
            writeln!(&mut out, "  Structure:  {} ({reason})", "incomplete".yellow()).unwrap();
        }
    }

    let class = match artifact.classify() {
        ArtifactClass::Runnable => "runnable".green().to_string(),
        ArtifactClass::LongRunning { marker } => {
            format!("{} (found '{marker}')", "long-running".yellow())
        }
        ArtifactClass::RequiresManualReview { marker } => {
            format!("{} (found '{marker}')", "needs manual review".yellow())
        }
    };
    write!(&mut out, "  Class:      {class}").unwrap();

    out
}
