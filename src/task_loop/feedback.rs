//! Builds the feedback text handed to the Generator on the next attempt.

use std::fmt::Write;

use crate::sandbox::{ExecutionOutcome, FailureKind, OutcomeKind};

/// What the Generator needs to know about a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreviousFailure {
    pub kind: OutcomeKind,
    pub critique: Option<String>,
    pub error_text: String,
    pub violated_rule: Option<String>,
}

impl PreviousFailure {
    pub fn new(outcome: &ExecutionOutcome, critique: Option<&str>, violated_rule: Option<&str>) -> Self {
        Self {
            kind: outcome.kind,
            critique: critique
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            error_text: outcome.error_text(),
            violated_rule: violated_rule.map(str::to_string),
        }
    }
}

/// Critique first, then a section for the failure kind, then session context.
///
/// Returns `None` when there is nothing to say.
pub(crate) fn compose(previous: Option<&PreviousFailure>, context: Option<&str>) -> Option<String> {
    let mut out = String::new();

    if let Some(prev) = previous {
        match prev.critique.as_deref() {
            Some(critique) => {
                let _ = write!(
                    out,
                    "Previous attempt failed. Critic feedback:\n{critique}\n\nPlease fix these issues."
                );
            }
            None => {
                let _ = write!(
                    out,
                    "Previous attempt failed with:\n{}\n\nPlease fix these issues.",
                    prev.error_text.trim()
                );
            }
        }
        if let Some(section) = kind_section(prev) {
            out.push_str("\n\n");
            out.push_str(&section);
        }
    }

    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let _ = write!(out, "## Context from previous tasks:\n{context}");
    }

    (!out.is_empty()).then_some(out)
}

fn kind_section(prev: &PreviousFailure) -> Option<String> {
    let section = match prev.kind {
        OutcomeKind::Failed(FailureKind::SyntaxIncomplete) => {
            "## ⚠️ INCOMPLETE OUTPUT\n\
             Your previous output was truncated or incomplete. \
             Return the complete program, not a fragment."
                .to_string()
        }
        OutcomeKind::Failed(FailureKind::TimeoutExceeded) => {
            "## ⚠️ TIMEOUT\n\
             The previous program did not finish within the time limit. \
             Avoid unbounded loops and blocking calls."
                .to_string()
        }
        OutcomeKind::Failed(FailureKind::SafetyViolation) => {
            let rule = prev.violated_rule.as_deref().unwrap_or("a safety rule");
            format!(
                "## ⚠️ SAFETY VIOLATION\n\
                 The previous program was blocked by rule '{rule}' before it ran. \
                 Solve the task without that capability."
            )
        }
        OutcomeKind::Skipped => "## ⚠️ NOT RUNNABLE UNATTENDED\n\
             The previous program waits for a user. \
             Remove interactive input and event loops; take inputs as constants."
            .to_string(),
        _ => return None,
    };
    Some(section)
}
