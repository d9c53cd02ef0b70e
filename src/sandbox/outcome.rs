//! Uniform result type for every execution attempt.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::BackendKind;

/// Why an execution attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FailureKind {
    /// Blocked by the safety policy; nothing ran.
    SafetyViolation,
    /// Artifact does not parse to completion; nothing ran.
    SyntaxIncomplete,
    /// The program ran and failed.
    RuntimeFailure,
    /// The program exceeded its wall-clock budget and was killed.
    TimeoutExceeded,
    /// The requested isolation backend cannot be reached.
    BackendUnavailable,
    /// The Generator or Reviewer could not be invoked.
    InvocationError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::SafetyViolation => "safety violation",
            Self::SyntaxIncomplete => "incomplete artifact",
            Self::RuntimeFailure => "runtime failure",
            Self::TimeoutExceeded => "timeout",
            Self::BackendUnavailable => "backend unavailable",
            Self::InvocationError => "invocation error",
        };
        write!(f, "{label}")
    }
}

/// Terminal state of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "failure", rename_all = "snake_case")]
pub(crate) enum OutcomeKind {
    Passed,
    Failed(FailureKind),
    /// Nothing executed because the artifact needs a human at the keyboard.
    Skipped,
}

/// Normalized outcome of running one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ExecutionOutcome {
    /// True only for [`OutcomeKind::Passed`].
    pub succeeded: bool,
    pub kind: OutcomeKind,
    /// Captured standard output, bounded by `max_output_bytes`.
    pub stdout: String,
    pub error_message: Option<String>,
    pub elapsed: Duration,
    pub backend_used: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionOutcome {
    pub fn passed(backend: BackendKind, stdout: String, elapsed: Duration) -> Self {
        Self {
            succeeded: true,
            kind: OutcomeKind::Passed,
            stdout,
            error_message: None,
            elapsed,
            backend_used: backend,
            exit_code: None,
            truncated: false,
        }
    }

    pub fn failed(
        backend: BackendKind,
        failure: FailureKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            succeeded: false,
            kind: OutcomeKind::Failed(failure),
            stdout: String::new(),
            error_message: Some(message.into()),
            elapsed,
            backend_used: backend,
            exit_code: None,
            truncated: false,
        }
    }

    pub fn skipped(backend: BackendKind, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            kind: OutcomeKind::Skipped,
            stdout: String::new(),
            error_message: Some(message.into()),
            elapsed: Duration::ZERO,
            backend_used: backend,
            exit_code: None,
            truncated: false,
        }
    }

    /// Timeout outcome. `elapsed` is clamped so it never reports less than the limit.
    pub fn timed_out(backend: BackendKind, limit: Duration, elapsed: Duration) -> Self {
        Self::failed(
            backend,
            FailureKind::TimeoutExceeded,
            timeout_message(limit),
            elapsed.max(limit),
        )
    }

    #[must_use]
    pub fn with_stdout(mut self, stdout: String, truncated: bool) -> Self {
        self.stdout = stdout;
        self.truncated = self.truncated || truncated;
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, code: Option<i64>) -> Self {
        self.exit_code = code;
        self
    }

    /// The failure classification, if any.
    pub fn failure(&self) -> Option<FailureKind> {
        match self.kind {
            OutcomeKind::Failed(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn is_failure(&self, kind: FailureKind) -> bool {
        self.failure() == Some(kind)
    }

    /// True when the outcome carries something a reviewer can act on.
    pub fn is_informative(&self) -> bool {
        !self.stdout.trim().is_empty()
            || self
                .error_message
                .as_deref()
                .is_some_and(|m| !m.trim().is_empty())
    }

    /// Error text handed to the Reviewer.
    pub fn error_text(&self) -> String {
        match (&self.error_message, self.stdout.trim().is_empty()) {
            (Some(msg), true) => msg.clone(),
            (Some(msg), false) => format!("{msg}\n\nOutput before failure:\n{}", self.stdout),
            (None, false) => self.stdout.clone(),
            (None, true) => "no output".to_string(),
        }
    }

    /// One-line summary for session records and status output.
    pub fn summary(&self) -> String {
        let secs = self.elapsed.as_secs_f64();
        match self.kind {
            OutcomeKind::Passed => format!("passed via {} in {secs:.2}s", self.backend_used),
            OutcomeKind::Skipped => format!("skipped by {}", self.backend_used),
            OutcomeKind::Failed(kind) => {
                let first_line = self
                    .error_message
                    .as_deref()
                    .and_then(|m| m.lines().rev().find(|l| !l.trim().is_empty()))
                    .unwrap_or("");
                format!("{kind} via {}: {}", self.backend_used, first_line.trim())
            }
        }
    }
}

/// Message used for every timeout, regardless of backend.
pub(crate) fn timeout_message(limit: Duration) -> String {
    format!("Execution timed out after {} seconds", limit.as_secs_f64())
}
