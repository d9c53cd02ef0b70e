//! Persistent session record, written to `.sandloop/session.json`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::task_loop::{TaskRun, TaskStatus};

/// Directory for everything sandloop writes into a project.
pub(crate) const STATE_DIR: &str = ".sandloop";

const SESSION_FILE: &str = "session.json";

/// Summary of one finished task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TaskEntry {
    pub task_description: String,
    /// Source of the best attempt.
    pub final_artifact: String,
    pub outcome_summary: String,
    pub attempt_count: usize,
    /// Last reviewer critique; empty when the task passed first time.
    #[serde(default)]
    pub critique: String,
    pub status: TaskStatus,
}

impl TaskEntry {
    pub fn from_run(run: &TaskRun) -> Self {
        let best = run.best();
        Self {
            task_description: run.task_description.clone(),
            final_artifact: best
                .map(|a| a.artifact.source().to_string())
                .unwrap_or_default(),
            outcome_summary: best.map(|a| a.outcome.summary()).unwrap_or_default(),
            attempt_count: run.attempts.len(),
            critique: run.last_critique().unwrap_or_default().to_string(),
            status: run.status(),
        }
    }
}

/// Ordered record of every task in one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionRecord {
    pub prompt: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

impl SessionRecord {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            started_at: Utc::now(),
            finished_at: None,
            tasks: Vec::new(),
        }
    }

    pub fn path(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR).join(SESSION_FILE)
    }

    pub fn push(&mut self, run: &TaskRun) {
        self.tasks.push(TaskEntry::from_run(run));
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Worst result code across tasks: unsafe, then failed, then passed.
    pub fn overall_status(&self) -> TaskStatus {
        if self.count(TaskStatus::Unsafe) > 0 {
            TaskStatus::Unsafe
        } else if self.count(TaskStatus::Failed) > 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Passed
        }
    }

    /// Load the last record if one exists
    pub fn load(project_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(project_dir);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session record: {}", path.display()))?;

        let record: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session record: {}", path.display()))?;

        Ok(Some(record))
    }

    /// Save the record, replacing any previous one
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let path = Self::path(project_dir);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize session record")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write session record: {}", path.display()))?;

        Ok(())
    }
}
