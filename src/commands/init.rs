//! `sandloop init`: drop the starter config and task list into a directory.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::CONFIG_FILE;
use crate::templates;

/// Default tasks file name for `sandloop session`.
pub(crate) const TASKS_FILE: &str = "tasks.txt";

struct StarterFile {
    name: &'static str,
    content: &'static str,
    purpose: &'static str,
}

const STARTER_FILES: &[StarterFile] = &[
    StarterFile {
        name: CONFIG_FILE,
        content: templates::SANDLOOP_TOML,
        purpose: "Execution, retry and collaborator settings",
    },
    StarterFile {
        name: TASKS_FILE,
        content: templates::TASKS_TXT,
        purpose: "Example task list for `sandloop session`",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Replace,
    Keep,
}

fn action(exists: bool, force: bool) -> Action {
    match (exists, force) {
        (false, _) => Action::Create,
        (true, true) => Action::Replace,
        (true, false) => Action::Keep,
    }
}

pub(crate) fn run(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    info!("Initializing sandloop in {}", cwd.display());

    let report = write_starter_files(&cwd, force)?;
    print!("{}", format_report(&report));
    Ok(())
}

fn write_starter_files(dir: &Path, force: bool) -> Result<Vec<(&'static StarterFile, Action)>> {
    let mut report = Vec::with_capacity(STARTER_FILES.len());
    for file in STARTER_FILES {
        let path = dir.join(file.name);
        let action = action(path.exists(), force);
        if action != Action::Keep {
            fs::write(&path, file.content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        report.push((file, action));
    }
    Ok(report)
}

fn format_report(report: &[(&StarterFile, Action)]) -> String {
    let mut out = String::new();
    writeln!(out, "\n{} sandloop is ready\n", "✓".green().bold()).unwrap();

    for (file, action) in report {
        let line = match action {
            Action::Create => format!("  {} {}", file.name.cyan(), file.purpose.dimmed()),
            Action::Replace => format!("  {} {} (replaced)", file.name.cyan(), file.purpose.dimmed()),
            Action::Keep => format!(
                "  {} {} kept, pass --force to replace it",
                "⊘".yellow(),
                file.name
            ),
        };
        writeln!(out, "{line}").unwrap();
    }

    writeln!(
        out,
        "\nTry {} or {}",
        "sandloop run \"<task>\"".green(),
        format!("sandloop session {TASKS_FILE}").green()
    )
    .unwrap();
    out
}
