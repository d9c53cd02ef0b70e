//! Recording backend for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BackendKind, ExecutionLimits, ExecutionOutcome, FailureKind, IsolationBackend};
use crate::artifact::Artifact;

/// A backend that runs nothing and counts how often it was entered.
///
/// Useful for:
/// - asserting that blocked artifacts never reach a backend
/// - driving the task loop with scripted pass/fail outcomes
#[derive(Debug, Clone)]
pub(crate) struct SpyBackend {
    kind: BackendKind,
    /// Outcomes to return in order. The last one repeats.
    script: Arc<Vec<SpyResult>>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

/// Scripted result for one call.
#[derive(Debug, Clone)]
pub(crate) enum SpyResult {
    Pass(String),
    Fail(FailureKind, String),
}

impl SpyBackend {
    pub fn new(kind: BackendKind, script: Vec<SpyResult>) -> Self {
        Self {
            kind,
            script: Arc::new(script),
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    /// A spy whose every call passes with `stdout`.
    pub fn passing(kind: BackendKind, stdout: &str) -> Self {
        Self::new(kind, vec![SpyResult::Pass(stdout.to_string())])
    }

    /// A spy whose every call fails at runtime with `message`.
    pub fn failing(kind: BackendKind, message: &str) -> Self {
        Self::new(
            kind,
            vec![SpyResult::Fail(
                FailureKind::RuntimeFailure,
                message.to_string(),
            )],
        )
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sources of every artifact this backend received.
    pub fn seen_sources(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl IsolationBackend for SpyBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn execute(&self, artifact: &Artifact, _limits: &ExecutionLimits) -> ExecutionOutcome {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(artifact.source().to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = &self.script[n.min(self.script.len() - 1)];
        match result {
            SpyResult::Pass(stdout) => {
                ExecutionOutcome::passed(self.kind, stdout.clone(), self.delay)
            }
            SpyResult::Fail(kind, message) => {
                ExecutionOutcome::failed(self.kind, *kind, message.clone(), self.delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spy_counts_calls() {
        let spy = SpyBackend::passing(BackendKind::Subprocess, "ok");
        let artifact = Artifact::from_source("print('ok')");
        let limits = ExecutionLimits::for_tests();

        assert_eq!(spy.call_count(), 0);
        let outcome = spy.execute(&artifact, &limits).await;
        assert!(outcome.succeeded);
        assert_eq!(spy.call_count(), 1);
        assert_eq!(spy.seen_sources(), vec!["print('ok')".to_string()]);
    }

    #[tokio::test]
    async fn test_spy_script_repeats_last() {
        let spy = SpyBackend::new(
            BackendKind::Container,
            vec![
                SpyResult::Fail(FailureKind::RuntimeFailure, "boom".into()),
                SpyResult::Pass("fine".into()),
            ],
        );
        let artifact = Artifact::from_source("x = 1");
        let limits = ExecutionLimits::for_tests();

        assert!(!spy.execute(&artifact, &limits).await.succeeded);
        assert!(spy.execute(&artifact, &limits).await.succeeded);
        assert!(spy.execute(&artifact, &limits).await.succeeded);
    }

    #[test]
    fn test_spy_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SpyBackend>();
    }
}
