//! Isolation backends for running untrusted artifacts.
//!
//! Three interchangeable strategies share one contract: `execute` never
//! fails, every failure mode is represented in the returned
//! [`ExecutionOutcome`]. Output is bounded, wall time is reported, and
//! scratch files, processes and containers are cleaned up on every path.

mod capture;
mod docker;
mod error;
mod inprocess;
mod outcome;
#[cfg(test)]
pub(crate) mod spy;
mod subprocess;

pub(crate) use docker::ContainerBackend;
pub(crate) use error::SandboxError;
pub(crate) use inprocess::InProcessBackend;
pub(crate) use outcome::{ExecutionOutcome, FailureKind, OutcomeKind};
pub(crate) use subprocess::SubprocessBackend;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::artifact::Artifact;

/// Trait for isolation strategies.
#[async_trait]
pub(crate) trait IsolationBackend: Send + Sync {
    /// Which strategy this backend implements.
    fn kind(&self) -> BackendKind;

    /// Runs the artifact under `limits`.
    async fn execute(&self, artifact: &Artifact, limits: &ExecutionLimits) -> ExecutionOutcome;
}

/// Supported isolation strategies, weakest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BackendKind {
    /// Restricted interpreter embedded in this process.
    #[value(name = "inprocess")]
    InProcess,
    /// Child process with a scrubbed environment and scratch directory.
    #[default]
    Subprocess,
    /// Disposable container with no network.
    Container,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProcess => write!(f, "inprocess"),
            Self::Subprocess => write!(f, "subprocess"),
            Self::Container => write!(f, "container"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inprocess" | "in-process" | "restricted" => Ok(Self::InProcess),
            "subprocess" => Ok(Self::Subprocess),
            "container" | "docker" => Ok(Self::Container),
            _ => anyhow::bail!(
                "Unknown execution method: '{s}'. Supported: inprocess, subprocess, container"
            ),
        }
    }
}

impl BackendKind {
    /// Next stronger backend to try when this one is unreachable.
    pub fn fallback(self) -> Option<Self> {
        match self {
            Self::Container => Some(Self::Subprocess),
            Self::InProcess | Self::Subprocess => None,
        }
    }
}

/// Resource limits applied to one execution. Constant for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExecutionLimits {
    pub timeout: Duration,
    pub max_memory_mb: u64,
    pub max_output_bytes: usize,
    /// Library namespaces the artifact may import.
    pub allowed_capabilities: Vec<String>,
}

impl ExecutionLimits {
    pub fn memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    pub fn allows(&self, namespace: &str) -> bool {
        let root = namespace.split('.').next().unwrap_or(namespace);
        self.allowed_capabilities.iter().any(|c| c == root)
    }
}

#[cfg(test)]
impl ExecutionLimits {
    /// Small limits for tests.
    pub fn for_tests() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_memory_mb: 64,
            max_output_bytes: 10_000,
            allowed_capabilities: vec!["math".to_string(), "statistics".to_string()],
        }
    }
}
