//! In-process isolation on an embedded Python VM.
//!
//! Weakest isolation level: the artifact runs in a fresh interpreter on a
//! dedicated thread of this process. Builtins and importable namespaces
//! follow the static table in `capabilities`. Imports outside the allowed
//! set are rejected before anything runs.
//!
//! At the deadline the VM is interrupted with `KeyboardInterrupt` until it
//! stops. A thread that swallows every interrupt is abandoned after a short
//! grace. Memory is not bounded here; artifacts that need a memory bound
//! belong on a process backend.

mod capabilities;
mod runtime;

use async_trait::async_trait;
use rustpython::vm::signal::{user_signal_channel, UserSignalSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use self::runtime::{ProgramExit, SharedOutput};
use super::capture::BoundedOutput;
use super::{BackendKind, ExecutionLimits, ExecutionOutcome, FailureKind, IsolationBackend};
use crate::artifact::Artifact;

/// How long interrupts are retried after the deadline.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);
const INTERRUPT_INTERVAL: Duration = Duration::from_millis(25);

/// Deep recursion in the VM needs more than the default thread stack.
const RUNTIME_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Runs artifacts inside the embedded runtime.
#[derive(Debug, Default)]
pub(crate) struct InProcessBackend;

impl InProcessBackend {
    pub fn new() -> Self {
        Self
    }

    /// Whether the embedded runtime can run this artifact at all.
    ///
    /// Imports outside the allowed set count as supported: they fail with
    /// `ImportError` like they would anywhere else.
    pub fn supports(&self, artifact: &Artifact, limits: &ExecutionLimits) -> bool {
        let source = artifact.source();
        if let Some(name) = capabilities::routed_out_call(source) {
            debug!("Artifact calls {}(), which stays out of the in-process runtime", name);
            return false;
        }
        capabilities::imported_roots(source)
            .iter()
            .all(|m| !limits.allows(m) || capabilities::provides(m))
    }
}

/// First imported namespace the limits do not allow.
fn blocked_import(source: &str, limits: &ExecutionLimits) -> Option<String> {
    capabilities::imported_roots(source)
        .into_iter()
        .find(|root| !limits.allows(root))
}

fn shared_output(limit: usize) -> SharedOutput {
    Arc::new(Mutex::new(BoundedOutput::new(limit)))
}

fn snapshot(out: &SharedOutput) -> (String, bool) {
    match out.lock() {
        Ok(out) => out.clone().finish(),
        Err(poisoned) => poisoned.into_inner().clone().finish(),
    }
}

/// Keeps interrupting the VM until its thread reports back or the grace runs out.
async fn interrupt_until_stopped(
    interrupter: &UserSignalSender,
    done: &mut oneshot::Receiver<ProgramExit>,
) {
    let give_up = tokio::time::Instant::now() + DEADLINE_GRACE;
    loop {
        if interrupter.send(runtime::interrupt()).is_err() {
            // runtime already dropped its receiver
            return;
        }
        match tokio::time::timeout(INTERRUPT_INTERVAL, &mut *done).await {
            Ok(_) => return,
            Err(_) if tokio::time::Instant::now() >= give_up => {
                warn!(
                    "In-process runtime ignored interrupts for {:?}, abandoning its thread",
                    DEADLINE_GRACE
                );
                return;
            }
            Err(_) => {}
        }
    }
}

fn outcome_from_exit(
    exit: ProgramExit,
    stdout: (String, bool),
    stderr: &str,
    elapsed: Duration,
) -> ExecutionOutcome {
    let (text, truncated) = stdout;
    let outcome = match exit {
        ProgramExit::Completed => {
            ExecutionOutcome::passed(BackendKind::InProcess, String::new(), elapsed)
        }
        ProgramExit::Raised(error) => {
            let message = if stderr.trim().is_empty() {
                error
            } else {
                format!("{}\n{error}", stderr.trim_end())
            };
            ExecutionOutcome::failed(
                BackendKind::InProcess,
                FailureKind::RuntimeFailure,
                message,
                elapsed,
            )
        }
        ProgramExit::Setup(message) => ExecutionOutcome::failed(
            BackendKind::InProcess,
            FailureKind::BackendUnavailable,
            format!("In-process runtime unavailable: {message}"),
            elapsed,
        ),
    };
    outcome.with_stdout(text, truncated)
}

#[async_trait]
impl IsolationBackend for InProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    async fn execute(&self, artifact: &Artifact, limits: &ExecutionLimits) -> ExecutionOutcome {
        let started = Instant::now();
        if let Some(module) = blocked_import(artifact.source(), limits) {
            return ExecutionOutcome::failed(
                BackendKind::InProcess,
                FailureKind::RuntimeFailure,
                format!("ImportError: import of '{module}' is not allowed"),
                started.elapsed(),
            );
        }

        let stdout = shared_output(limits.max_output_bytes);
        let stderr = shared_output(limits.max_output_bytes);
        let (interrupter, interrupts) = user_signal_channel();
        let (done_tx, mut done_rx) = oneshot::channel();

        let source = artifact.source().to_string();
        let (out, err) = (Arc::clone(&stdout), Arc::clone(&stderr));
        // A plain thread, so a runaway artifact never holds up runtime shutdown
        let spawned = std::thread::Builder::new()
            .name("sandloop-inprocess".to_string())
            .stack_size(RUNTIME_STACK_BYTES)
            .spawn(move || {
                let exit = runtime::run_program(&source, out, err, interrupts);
                // receiver is gone once the caller stopped waiting
                let _ = done_tx.send(exit);
            });
        if let Err(e) = spawned {
            return ExecutionOutcome::failed(
                BackendKind::InProcess,
                FailureKind::BackendUnavailable,
                format!("In-process runtime unavailable: {e}"),
                started.elapsed(),
            );
        }

        let exit = match tokio::time::timeout(limits.timeout, &mut done_rx).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(_)) => ProgramExit::Raised("In-process runtime crashed".to_string()),
            Err(_) => {
                warn!("In-process run exceeded {:?}, interrupting", limits.timeout);
                interrupt_until_stopped(&interrupter, &mut done_rx).await;
                let (text, truncated) = snapshot(&stdout);
                return ExecutionOutcome::timed_out(
                    BackendKind::InProcess,
                    limits.timeout,
                    started.elapsed(),
                )
                .with_stdout(text, truncated);
            }
        };

        let (stderr, _) = snapshot(&stderr);
        outcome_from_exit(exit, snapshot(&stdout), &stderr, started.elapsed())
    }
}
