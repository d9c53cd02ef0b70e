//! CLI command implementations.
//!
//! Each submodule implements one sandloop command with pure core logic
//! separated from IO for testability. The helpers here wire configuration
//! into collaborators, the coordinator and the task loop.

pub mod check;
pub mod exec;
pub mod init;
pub mod run;
pub mod session;
pub mod status;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::agent::{build_client, ModelDocumenter, ModelGenerator, ModelReviewer, Provider};
use crate::config::{Config, ProviderConfig};
use crate::coordinator::Coordinator;
use crate::retry::RetryPolicy;
use crate::sandbox::BackendKind;
use crate::task_loop::TaskLoop;

/// Environment variable overriding the provider of every collaborator.
pub(crate) const PROVIDER_ENV: &str = "SANDLOOP_PROVIDER";

pub(crate) fn load_config(project_dir: &Path) -> Result<Config> {
    Config::load(project_dir).context("Failed to load sandloop.toml")
}

/// Resolves the provider for one collaborator section.
/// Priority: CLI flag > `SANDLOOP_PROVIDER` env var > config file.
pub(crate) fn resolve_provider(
    section: &ProviderConfig,
    provider_override: Option<&str>,
) -> Result<Provider> {
    let env_provider = std::env::var(PROVIDER_ENV).ok();
    resolve_provider_with_env(section, provider_override, env_provider.as_deref())
}

/// Provider resolution with an explicit env var value.
fn resolve_provider_with_env(
    section: &ProviderConfig,
    provider_override: Option<&str>,
    env_provider: Option<&str>,
) -> Result<Provider> {
    if let Some(p) = provider_override {
        debug!("Using CLI provider override: {}", p);
        return p.parse();
    }

    if let Some(env_val) = env_provider.filter(|v| !v.is_empty()) {
        debug!("Using {} env var: {}", PROVIDER_ENV, env_val);
        return env_val.parse();
    }

    section.get_provider()
}

/// Backend from the flag, else from `[execution].method`.
pub(crate) fn resolve_backend(config: &Config, backend: Option<BackendKind>) -> Result<BackendKind> {
    match backend {
        Some(kind) => Ok(kind),
        None => config.execution.backend(),
    }
}

/// Generator, Reviewer and coordinator wired into a task loop.
pub(crate) fn build_task_loop(
    config: &Config,
    backend: BackendKind,
    provider_override: Option<&str>,
) -> Result<TaskLoop> {
    let generator_provider = resolve_provider(&config.generator, provider_override)?;
    let reviewer_provider = resolve_provider(&config.reviewer, provider_override)?;

    let generator = ModelGenerator::new(
        build_client(&config.generator, generator_provider)
            .context("Failed to set up the generator")?,
    );
    let reviewer = ModelReviewer::new(
        build_client(&config.reviewer, reviewer_provider)
            .context("Failed to set up the reviewer")?,
    );

    Ok(TaskLoop::new(
        Arc::new(generator),
        Arc::new(reviewer),
        Arc::new(Coordinator::from_config(config)),
        config.limits(),
        backend,
    )
    .with_retry(RetryPolicy::from_config(&config.retry)))
}

/// Test and README writer; shares the `[generator]` settings.
pub(crate) fn build_documenter(
    config: &Config,
    provider_override: Option<&str>,
) -> Result<ModelDocumenter> {
    let provider = resolve_provider(&config.generator, provider_override)?;
    let client =
        build_client(&config.generator, provider).context("Failed to set up the documenter")?;
    Ok(ModelDocumenter::new(client))
}
