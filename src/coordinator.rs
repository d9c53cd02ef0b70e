//! Execution coordinator.
//!
//! Owns the isolation backends and the shared capacity limiter. Every
//! execution goes through [`Coordinator::run`], which applies the safety
//! verdict, the completeness check and classification before a backend is
//! entered, so the backends themselves never see a blocked artifact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactClass};
use crate::config::Config;
use crate::sandbox::{
    BackendKind, ContainerBackend, ExecutionLimits, ExecutionOutcome, FailureKind,
    InProcessBackend, IsolationBackend, SubprocessBackend,
};

// ---- Capacity limiter ----

/// Counts active sandboxed executions across all backends.
#[derive(Debug)]
pub(crate) struct ExecutionSlots {
    capacity: usize,
    active: Mutex<usize>,
    released: Notify,
}

/// Held while one execution runs. Frees the slot on drop.
#[derive(Debug)]
pub(crate) struct SlotGuard<'a> {
    slots: &'a ExecutionSlots,
}

impl ExecutionSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            active: Mutex::new(0),
            released: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active(&self) -> usize {
        *self.lock()
    }

    /// Waits until a slot is free and takes it.
    pub async fn acquire(&self) -> SlotGuard<'_> {
        loop {
            // Registered before the check so a release in between is not missed.
            let released = self.released.notified();
            {
                let mut active = self.lock();
                if *active < self.capacity {
                    *active += 1;
                    return SlotGuard { slots: self };
                }
            }
            released.await;
        }
    }

    fn release(&self) {
        {
            let mut active = self.lock();
            *active = active.saturating_sub(1);
        }
        self.released.notify_waiters();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slots.release();
    }
}

// ---- Routing ----

/// What the coordinator decided to do with an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    /// Blocked by the safety policy.
    Blocked(String),
    /// Does not parse to completion.
    Incomplete(String),
    /// Needs a human; nothing runs.
    Skip(String),
    /// Run on this backend.
    Execute(BackendKind),
}

/// Selects backends and normalizes every result into an [`ExecutionOutcome`].
pub(crate) struct Coordinator {
    backends: HashMap<BackendKind, Arc<dyn IsolationBackend>>,
    interpreter: InProcessBackend,
    slots: Arc<ExecutionSlots>,
    fallback_on_unavailable: bool,
}

impl Coordinator {
    /// A coordinator with no backends. Add them with [`Coordinator::with_backend`].
    pub fn new(slots: Arc<ExecutionSlots>) -> Self {
        Self {
            backends: HashMap::new(),
            interpreter: InProcessBackend::new(),
            slots,
            fallback_on_unavailable: false,
        }
    }

    /// All three backends, configured from the `[subprocess]`, `[container]`
    /// and `[execution]` sections.
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(ExecutionSlots::new(config.execution.max_concurrent)))
            .with_backend(Arc::new(InProcessBackend::new()))
            .with_backend(Arc::new(SubprocessBackend::new(config.subprocess.clone())))
            .with_backend(Arc::new(ContainerBackend::new(config.container.clone())))
            .with_fallback(config.execution.fallback_on_unavailable)
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn IsolationBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_on_unavailable = enabled;
        self
    }

    #[cfg(test)]
    pub fn slots(&self) -> &ExecutionSlots {
        &self.slots
    }

    /// Decides where, or whether, the artifact runs. Never touches a backend.
    pub fn route(
        &self,
        artifact: &Artifact,
        limits: &ExecutionLimits,
        requested: BackendKind,
    ) -> Route {
        let verdict = artifact.verdict();
        if !verdict.allowed {
            let message = verdict
                .message
                .clone()
                .unwrap_or_else(|| "Security violation".to_string());
            return Route::Blocked(message);
        }

        if !artifact.is_complete() {
            let reason = artifact.incomplete_reason().unwrap_or("incomplete artifact");
            return Route::Incomplete(format!("Artifact is incomplete: {reason}"));
        }

        match artifact.classify() {
            ArtifactClass::RequiresManualReview { marker } => Route::Skip(format!(
                "Skipped: artifact needs an interactive session ('{marker}')"
            )),
            ArtifactClass::LongRunning { marker } if requested == BackendKind::InProcess => {
                debug!(
                    "Artifact may run indefinitely ('{}'), routing to subprocess",
                    marker
                );
                Route::Execute(BackendKind::Subprocess)
            }
            _ if requested == BackendKind::InProcess
                && !self.interpreter.supports(artifact, limits) =>
            {
                debug!("Artifact needs more than the in-process runtime exposes, routing to subprocess");
                Route::Execute(BackendKind::Subprocess)
            }
            _ => Route::Execute(requested),
        }
    }

    /// Runs `artifact` under `limits`, preferring `requested`.
    pub async fn run(
        &self,
        artifact: &Artifact,
        limits: &ExecutionLimits,
        requested: BackendKind,
    ) -> ExecutionOutcome {
        let kind = match self.route(artifact, limits, requested) {
            Route::Blocked(message) => {
                warn!("Artifact blocked by safety policy: {}", message);
                return ExecutionOutcome::failed(
                    requested,
                    FailureKind::SafetyViolation,
                    message,
                    Duration::ZERO,
                );
            }
            Route::Incomplete(message) => {
                return ExecutionOutcome::failed(
                    requested,
                    FailureKind::SyntaxIncomplete,
                    message,
                    Duration::ZERO,
                );
            }
            Route::Skip(message) => {
                info!("{}", message);
                return ExecutionOutcome::skipped(requested, message);
            }
            Route::Execute(kind) => kind,
        };

        let _slot = self.slots.acquire().await;
        debug!(
            "Acquired execution slot ({}/{} in use)",
            self.slots.active(),
            self.slots.capacity()
        );
        let outcome = self.execute_on(kind, artifact, limits).await;

        if !self.fallback_on_unavailable || !outcome.is_failure(FailureKind::BackendUnavailable) {
            return outcome;
        }
        match kind.fallback() {
            Some(next) => {
                warn!(
                    "{} backend unavailable, falling back to {}: {}",
                    kind,
                    next,
                    outcome.error_message.as_deref().unwrap_or("")
                );
                self.execute_on(next, artifact, limits).await
            }
            None => outcome,
        }
    }

    async fn execute_on(
        &self,
        kind: BackendKind,
        artifact: &Artifact,
        limits: &ExecutionLimits,
    ) -> ExecutionOutcome {
        let Some(backend) = self.backends.get(&kind) else {
            return ExecutionOutcome::failed(
                kind,
                FailureKind::BackendUnavailable,
                format!("No {kind} backend is configured"),
                Duration::ZERO,
            );
        };
        debug!("Executing artifact on {} backend", kind);
        backend.execute(artifact, limits).await
    }
}
