use anyhow::{Context, Result};
use colored::Colorize;

use crate::session::format::format_session_summary;
use crate::session::SessionRecord;

pub(crate) fn run() -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    match SessionRecord::load(&cwd)? {
        Some(record) => {
            println!("\n{}", "━".repeat(50).dimmed());
            println!("{}", format_session_summary(&record));
            println!("{}", "━".repeat(50).dimmed());
        }
        None => {
            println!("\n{} No session record found.", "ℹ".blue());
            println!(
                "  Run {} or {} to create one.",
                "sandloop run".green(),
                "sandloop session".green()
            );
        }
    }

    Ok(())
}
