//! Feedback-driven task loop.
//!
//! One task description in, one [`TaskRun`] out:
//! GENERATE → SAFETY_CHECK → EXECUTE → CLASSIFY, then either stop on a pass
//! or ask the Reviewer for a critique and generate again, bounded by the
//! attempt budget. Per-attempt failures are captured in the run and never
//! escape this module.
//!
//! Submodules:
//! - `feedback`: text handed to the Generator on the next attempt
//! - `format`: progress display

mod feedback;
pub(crate) mod format;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::{Generator, Reviewer};
use crate::artifact::Artifact;
use crate::coordinator::Coordinator;
use crate::retry::{invoke_with_retry, RetryPolicy};
use crate::sandbox::{BackendKind, ExecutionLimits, ExecutionOutcome, FailureKind, OutcomeKind};

use feedback::PreviousFailure;
use format::{format_attempt_header, format_attempt_outcome, format_task_finished};

/// One Generator call and everything that followed from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Attempt {
    /// 0-based position in the run.
    pub index: usize,
    pub artifact: Artifact,
    pub outcome: ExecutionOutcome,
    /// Reviewer output, present when a later attempt was still possible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<String>,
}

/// Result code for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TaskStatus {
    Passed,
    Failed,
    /// Every attempt was blocked by the safety policy.
    Unsafe,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Unsafe => write!(f, "unsafe"),
        }
    }
}

impl TaskStatus {
    /// Process exit code for the CLI.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Passed => 0,
            Self::Failed => 1,
            Self::Unsafe => 2,
        }
    }
}

/// Everything one task loop produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TaskRun {
    pub task_description: String,
    pub attempts: Vec<Attempt>,
    pub best_attempt_index: usize,
    pub final_passed: bool,
}

impl TaskRun {
    pub fn best(&self) -> Option<&Attempt> {
        self.attempts.get(self.best_attempt_index)
    }

    pub fn status(&self) -> TaskStatus {
        if self.final_passed {
            TaskStatus::Passed
        } else if !self.attempts.is_empty()
            && self
                .attempts
                .iter()
                .all(|a| a.outcome.is_failure(FailureKind::SafetyViolation))
        {
            TaskStatus::Unsafe
        } else {
            TaskStatus::Failed
        }
    }

    /// Most recent non-empty critique.
    pub fn last_critique(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.critique.as_deref().filter(|c| !c.trim().is_empty()))
    }
}

/// How much a failed outcome tells the operator. Zero when it says nothing.
fn informativeness(outcome: &ExecutionOutcome) -> u8 {
    if !outcome.is_informative() {
        return 0;
    }
    match outcome.kind {
        OutcomeKind::Passed => 5,
        OutcomeKind::Failed(FailureKind::RuntimeFailure | FailureKind::TimeoutExceeded) => 4,
        OutcomeKind::Failed(FailureKind::SyntaxIncomplete | FailureKind::SafetyViolation)
        | OutcomeKind::Skipped => 3,
        OutcomeKind::Failed(FailureKind::BackendUnavailable) => 2,
        OutcomeKind::Failed(FailureKind::InvocationError) => 1,
    }
}

/// First passing attempt, else the most informative one (latest on ties),
/// else the last.
pub(crate) fn select_best(attempts: &[Attempt]) -> usize {
    if let Some(pass) = attempts.iter().position(|a| a.outcome.succeeded) {
        return pass;
    }
    attempts
        .iter()
        .filter(|a| informativeness(&a.outcome) > 0)
        .max_by_key(|a| informativeness(&a.outcome))
        .map_or(attempts.len().saturating_sub(1), |a| a.index)
}

/// Drives Generator → Coordinator → Reviewer for one task at a time.
pub(crate) struct TaskLoop {
    generator: Arc<dyn Generator>,
    reviewer: Arc<dyn Reviewer>,
    coordinator: Arc<Coordinator>,
    limits: ExecutionLimits,
    backend: BackendKind,
    retry: RetryPolicy,
    progress: bool,
}

impl TaskLoop {
    pub fn new(
        generator: Arc<dyn Generator>,
        reviewer: Arc<dyn Reviewer>,
        coordinator: Arc<Coordinator>,
        limits: ExecutionLimits,
        backend: BackendKind,
    ) -> Self {
        Self {
            generator,
            reviewer,
            coordinator,
            limits,
            backend,
            retry: RetryPolicy::default(),
            progress: false,
        }
    }

    /// Backoff for Generator/Reviewer calls.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Print per-attempt progress to stdout.
    #[must_use]
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn generator_name(&self) -> &'static str {
        self.generator.name()
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub async fn run_task(&self, task: &str, max_attempts: usize) -> TaskRun {
        self.run_task_in_context(task, max_attempts, None).await
    }

    /// Runs one task. `context` summarizes names defined by earlier tasks and
    /// is passed on every attempt, the first included.
    pub async fn run_task_in_context(
        &self,
        task: &str,
        max_attempts: usize,
        context: Option<&str>,
    ) -> TaskRun {
        let max_attempts = max_attempts.max(1);
        let mut attempts: Vec<Attempt> = Vec::with_capacity(max_attempts);
        let mut previous: Option<PreviousFailure> = None;
        let mut final_passed = false;
        let mut reason = "attempts_exhausted";

        tracing::info!(
            event = "task_start",
            task = task,
            max_attempts = max_attempts,
            backend = %self.backend,
            generator = self.generator.name(),
        );

        for index in 0..max_attempts {
            if self.progress {
                println!("{}", format_attempt_header(index + 1, max_attempts));
            }
            tracing::info!(
                event = "attempt_start",
                attempt = index + 1,
                max_attempts = max_attempts,
            );

            let feedback = feedback::compose(previous.as_ref(), context);
            let (artifact, outcome) = self.attempt(task, feedback.as_deref()).await;

            tracing::info!(
                event = "attempt_outcome",
                attempt = index + 1,
                succeeded = outcome.succeeded,
                kind = ?outcome.kind,
                backend = %outcome.backend_used,
                elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            );

            let mut attempt = Attempt {
                index,
                artifact,
                outcome,
                critique: None,
            };

            if attempt.outcome.succeeded {
                final_passed = true;
                reason = "passed";
                self.report(&attempt);
                attempts.push(attempt);
                break;
            }

            if attempt.outcome.is_failure(FailureKind::BackendUnavailable) {
                warn!(
                    "Stopping task: {}",
                    attempt.outcome.error_message.as_deref().unwrap_or("backend unavailable")
                );
                reason = "backend_unavailable";
                self.report(&attempt);
                attempts.push(attempt);
                break;
            }

            let has_next = index + 1 < max_attempts;
            let invocation_failed = attempt.outcome.is_failure(FailureKind::InvocationError);
            if has_next && !invocation_failed {
                attempt.critique = self.critique(task, &attempt).await;
            }
            if !invocation_failed {
                previous = Some(PreviousFailure::new(
                    &attempt.outcome,
                    attempt.critique.as_deref(),
                    attempt.artifact.verdict().violated_rule.as_deref(),
                ));
            }

            self.report(&attempt);
            attempts.push(attempt);
        }

        let best_attempt_index = select_best(&attempts);
        let run = TaskRun {
            task_description: task.to_string(),
            attempts,
            best_attempt_index,
            final_passed,
        };

        tracing::info!(
            event = "task_end",
            status = %run.status(),
            attempts = run.attempts.len(),
            best_attempt = run.best_attempt_index + 1,
            reason = reason,
        );
        if self.progress {
            println!("{}", format_task_finished(&run));
        }

        run
    }

    /// Generate and execute once. Generator failures become an
    /// `InvocationError` outcome on an empty artifact.
    async fn attempt(&self, task: &str, feedback: Option<&str>) -> (Artifact, ExecutionOutcome) {
        let generated = invoke_with_retry(&self.retry, "generator", || {
            self.generator.generate(task, feedback)
        })
        .await;

        match generated {
            Ok(generated) => {
                let artifact = Artifact::new(&generated.source, generated.complete);
                debug!("Generated {} bytes", artifact.source().len());
                let outcome = self.coordinator.run(&artifact, &self.limits, self.backend).await;
                (artifact, outcome)
            }
            Err(e) => {
                warn!("Generator failed: {:#}", e);
                let outcome = ExecutionOutcome::failed(
                    self.backend,
                    FailureKind::InvocationError,
                    format!("Generator invocation failed: {e:#}"),
                    Duration::ZERO,
                );
                (Artifact::empty(), outcome)
            }
        }
    }

    async fn critique(&self, task: &str, attempt: &Attempt) -> Option<String> {
        let source = attempt.artifact.source();
        let error_text = attempt.outcome.error_text();
        let reviewed = invoke_with_retry(&self.retry, "reviewer", || {
            self.reviewer.review(task, source, &error_text)
        })
        .await;

        match reviewed {
            Ok(critique) if !critique.trim().is_empty() => Some(critique.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!("Reviewer failed, retrying with the raw error only: {:#}", e);
                None
            }
        }
    }

    fn report(&self, attempt: &Attempt) {
        if self.progress {
            println!("{}", format_attempt_outcome(attempt));
        }
    }
}
