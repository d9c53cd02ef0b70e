//! `sandloop run`: one task through the feedback loop.

use anyhow::{Context, Result};
use tracing::warn;

use crate::sandbox::BackendKind;
use crate::session::SessionRecord;
use crate::task_loop::format::{format_banner, BannerInfo};

use super::{build_task_loop, load_config, resolve_backend};

/// Runs the task and returns the exit code for its result.
pub(crate) async fn run(
    description: &str,
    max_attempts: Option<usize>,
    backend: Option<BackendKind>,
    provider_override: Option<&str>,
) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = load_config(&cwd)?;

    let backend = resolve_backend(&config, backend)?;
    let max_attempts = max_attempts
        .filter(|n| *n > 0)
        .unwrap_or(config.task.max_attempts);

    let task_loop = build_task_loop(&config, backend, provider_override)?.with_progress(true);

    print!(
        "{}",
        format_banner(&BannerInfo {
            task: description.to_string(),
            generator: task_loop.generator_name().to_string(),
            backend: backend.to_string(),
            max_attempts,
        })
    );

    let run = task_loop.run_task(description, max_attempts).await;

    if let Some(best) = run.best() {
        if run.final_passed {
            println!("\n{}", best.artifact.source());
        }
    }

    let mut record = SessionRecord::new(description);
    record.push(&run);
    record.finish();
    if let Err(e) = record.save(&cwd) {
        warn!("Failed to save session record: {:#}", e);
    }

    Ok(run.status().exit_code())
}
