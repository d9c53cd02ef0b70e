//! Several tasks of one request, run in order against a shared context.
//!
//! Each task is a full task loop. When a task passes, its best artifact is
//! added to the [`SharedContext`] so later tasks reuse what already exists.
//! After every task is resolved, `finalize` asks the Documenter for a test
//! file and a README at the same time.
//!
//! Submodules:
//! - `context`: summary of names defined by earlier passing artifacts
//! - `record`: the JSON session record in `.sandloop/`
//! - `format`: status display

mod context;
pub(crate) mod format;
mod record;

pub(crate) use context::SharedContext;
pub(crate) use record::{SessionRecord, STATE_DIR};

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::agent::Documenter;
use crate::retry::{invoke_with_retry, RetryPolicy};
use crate::task_loop::TaskLoop;

/// Written instead of a test file when no task produced passing code.
pub(crate) const NO_CODE_TESTS: &str = "# No code to test\n";

const TESTS_FILE: &str = "tests.py";
const README_FILE: &str = "README.md";

/// One task per non-empty line. Lines starting with `#` are comments.
pub(crate) fn parse_tasks(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// The request text recorded for a list of tasks.
pub(crate) fn request_text(tasks: &[String]) -> String {
    tasks.join("; ")
}

/// Runs every task in order. Never fails: per-task problems end up in the
/// record.
pub(crate) async fn run_session(
    task_loop: &TaskLoop,
    tasks: &[String],
    max_attempts: usize,
) -> (SessionRecord, SharedContext) {
    let mut record = SessionRecord::new(request_text(tasks));
    let mut context = SharedContext::new();

    info!(event = "session_start", tasks = tasks.len());

    for (i, task) in tasks.iter().enumerate() {
        info!("Task {}/{}: {}", i + 1, tasks.len(), task);
        let summary = context.prompt_context();
        let run = task_loop
            .run_task_in_context(task, max_attempts, summary.as_deref())
            .await;

        if run.final_passed {
            if let Some(best) = run.best() {
                context.add_passing(best.artifact.source());
            }
        }
        record.push(&run);
    }

    record.finish();
    info!(
        event = "session_end",
        tasks = record.tasks.len(),
        status = %record.overall_status(),
    );

    (record, context)
}

/// Where the downstream files were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Finalized {
    pub tests_path: PathBuf,
    pub readme_path: PathBuf,
    /// False when the fallback text was written instead.
    pub tests_generated: bool,
    pub readme_generated: bool,
}

/// Generates the test file and the README concurrently and writes both into
/// `.sandloop/`. A failed generation writes a placeholder instead of failing.
pub(crate) async fn finalize(
    documenter: &dyn Documenter,
    retry: &RetryPolicy,
    record: &SessionRecord,
    context: &SharedContext,
    project_dir: &Path,
) -> Result<Finalized> {
    let source = context.combined_source();

    let (tests, readme) = if source.trim().is_empty() {
        info!("No passing code, skipping test and README generation");
        (
            Err(NO_CODE_TESTS.to_string()),
            Err(format!(
                "# Project\n\n{}\n\nNo task produced passing code.\n",
                record.prompt
            )),
        )
    } else {
        info!(event = "finalize_start", documenter = documenter.name());
        let (tests, readme) = tokio::join!(
            invoke_with_retry(retry, "tests", || documenter.write_tests(&source)),
            invoke_with_retry(retry, "readme", || {
                documenter.write_readme(&record.prompt, &source)
            }),
        );
        (
            tests.map_err(|e| {
                warn!("Test generation failed: {:#}", e);
                format!("# Test generation failed: {e:#}\n")
            }),
            readme.map_err(|e| {
                warn!("README generation failed: {:#}", e);
                format!("# Project\n\nREADME generation failed: {e:#}\n")
            }),
        )
    };

    let dir = project_dir.join(STATE_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let tests_path = dir.join(TESTS_FILE);
    let readme_path = dir.join(README_FILE);
    let tests_generated = tests.is_ok();
    let readme_generated = readme.is_ok();

    write_text(&tests_path, &tests.unwrap_or_else(|fallback| fallback))?;
    write_text(&readme_path, &readme.unwrap_or_else(|fallback| fallback))?;

    Ok(Finalized {
        tests_path,
        readme_path,
        tests_generated,
        readme_generated,
    })
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    let mut content = text.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
