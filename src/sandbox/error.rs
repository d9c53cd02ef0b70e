//! Domain-specific error types for isolation backends.
//!
//! Backends use these internally and convert them into an
//! [`ExecutionOutcome`] at the trait boundary, so callers never see a raw
//! error from `execute`.

use std::time::Duration;

use super::outcome::{ExecutionOutcome, FailureKind};
use super::BackendKind;

/// Errors that can occur inside an isolation backend.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SandboxError {
    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable { message: String },

    /// Container image was not found locally.
    #[error("Container image not found: {image}")]
    ImageNotFound { image: String },

    /// Execution exceeded the configured wall-clock limit.
    #[error("Execution timed out after {} seconds", .limit.as_secs_f64())]
    Timeout { limit: Duration },

    /// The interpreter binary could not be started.
    #[error("Failed to start interpreter '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    /// Container operation failed (create, start, wait, etc.).
    #[error("Container operation failed: {message}")]
    ContainerFailed { message: String },

    /// Scratch file or pipe I/O failed.
    #[error("Sandbox I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `ImageNotFound` error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    /// Creates a `Timeout` error from the configured limit.
    pub fn timeout(limit: Duration) -> Self {
        Self::Timeout { limit }
    }

    /// Creates a `SpawnFailed` error.
    pub fn spawn_failed(program: impl Into<String>, err: &std::io::Error) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            message: err.to_string(),
        }
    }

    /// Creates a `ContainerFailed` error.
    pub fn container_failed(message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            message: message.into(),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the backend itself cannot be used.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DockerUnavailable { .. } | Self::ImageNotFound { .. } | Self::SpawnFailed { .. }
        )
    }

    /// Outcome classification for this error.
    pub fn failure_kind(&self) -> FailureKind {
        if self.is_timeout() {
            FailureKind::TimeoutExceeded
        } else if self.is_unavailable() {
            FailureKind::BackendUnavailable
        } else {
            FailureKind::RuntimeFailure
        }
    }

    /// Converts the error into a failed outcome for `backend`.
    pub fn into_outcome(self, backend: BackendKind, elapsed: Duration) -> ExecutionOutcome {
        match self {
            Self::Timeout { limit } => ExecutionOutcome::timed_out(backend, limit, elapsed),
            other => ExecutionOutcome::failed(
                backend,
                other.failure_kind(),
                other.to_string(),
                elapsed,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_unavailable_error() {
        let err = SandboxError::docker_unavailable("daemon not running");
        assert!(err.is_unavailable());
        assert!(!err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Docker is not available: daemon not running"
        );
    }

    #[test]
    fn test_image_not_found_error() {
        let err = SandboxError::image_not_found("python:3.11-slim");
        assert!(err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "Container image not found: python:3.11-slim"
        );
    }

    #[test]
    fn test_timeout_error() {
        let err = SandboxError::timeout(Duration::from_secs(30));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Execution timed out after 30 seconds");
    }

    #[test]
    fn test_spawn_failed_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file");
        let err = SandboxError::spawn_failed("python3", &io);
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("python3"));
    }

    #[test]
    fn test_container_failed_error() {
        let err = SandboxError::container_failed("failed to start");
        assert!(!err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "Container operation failed: failed to start"
        );
    }

    #[test]
    fn test_failure_kinds_are_distinct() {
        let timeout = SandboxError::timeout(Duration::from_secs(1));
        let docker = SandboxError::docker_unavailable("test");
        let io = SandboxError::from(std::io::Error::other("disk full"));

        assert_eq!(timeout.failure_kind(), FailureKind::TimeoutExceeded);
        assert_eq!(docker.failure_kind(), FailureKind::BackendUnavailable);
        assert_eq!(io.failure_kind(), FailureKind::RuntimeFailure);
    }

    #[test]
    fn test_into_outcome_keeps_backend() {
        let outcome = SandboxError::docker_unavailable("no socket")
            .into_outcome(BackendKind::Container, Duration::ZERO);
        assert!(!outcome.succeeded);
        assert_eq!(outcome.backend_used, BackendKind::Container);
        assert!(outcome.is_failure(FailureKind::BackendUnavailable));
    }

    #[test]
    fn test_timeout_into_outcome_reports_full_limit() {
        let limit = Duration::from_secs(3);
        let outcome = SandboxError::timeout(limit)
            .into_outcome(BackendKind::Subprocess, Duration::from_secs(1));
        assert!(outcome.elapsed >= limit);
    }
}
