//! Collaborators that write and critique artifacts.
//!
//! Two layers:
//! - [`ModelClient`]: one prompt in, one completion out. Implemented by the
//!   `command` provider (any CLI that reads a prompt on stdin) and the `http`
//!   provider (OpenAI-compatible chat completions).
//! - Roles: [`Generator`], [`Reviewer`] and [`Documenter`]. The model-backed
//!   implementations in `roles` build prompts and parse replies; tests swap
//!   in the mocks.
//!
//! The provider is selected via `[generator].provider` / `[reviewer].provider`
//! in sandloop.toml.

mod command;
mod http;
#[cfg(test)]
pub(crate) mod mock;
mod prompts;
mod roles;

pub(crate) use command::CommandClient;
pub(crate) use http::HttpClient;
pub(crate) use roles::{ModelDocumenter, ModelGenerator, ModelReviewer};

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ProviderConfig;

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Prompt {
    pub system: String,
    pub user: String,
    /// Overrides the configured completion budget.
    pub max_tokens: Option<u32>,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Text returned by a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub text: String,
    /// The model stopped because it ran out of tokens.
    pub truncated: bool,
}

/// Trait for model backends.
#[async_trait]
pub(crate) trait ModelClient: Send + Sync {
    /// Returns the provider name for display.
    fn name(&self) -> &'static str;

    /// Sends one prompt and returns the completion.
    async fn complete(&self, prompt: &Prompt) -> Result<Reply>;
}

/// Raw Generator output before it becomes an [`Artifact`](crate::artifact::Artifact).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Generated {
    pub source: String,
    /// False when the collaborator reports truncated output.
    pub complete: bool,
}

/// Writes a candidate program for a task.
#[async_trait]
pub(crate) trait Generator: Send + Sync {
    fn name(&self) -> &'static str;

    /// `feedback` carries the previous critique and session context, if any.
    async fn generate(&self, task: &str, feedback: Option<&str>) -> Result<Generated>;
}

/// Critiques a failing program.
#[async_trait]
pub(crate) trait Reviewer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn review(&self, task: &str, source: &str, error_text: &str) -> Result<String>;
}

/// Produces the downstream test file and README for a finished session.
#[async_trait]
pub(crate) trait Documenter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn write_tests(&self, source: &str) -> Result<String>;

    async fn write_readme(&self, request: &str, source: &str) -> Result<String>;
}

/// Supported collaborator providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Provider {
    /// External command reading the prompt on stdin.
    Command,
    /// OpenAI-compatible chat completions endpoint.
    #[default]
    Http,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "command" | "cli" => Ok(Self::Command),
            "http" | "openai" => Ok(Self::Http),
            _ => anyhow::bail!("Unknown agent provider: '{s}'. Supported: command, http"),
        }
    }
}

/// Builds the model client for one collaborator section.
pub(crate) fn build_client(
    config: &ProviderConfig,
    provider: Provider,
) -> Result<Arc<dyn ModelClient>> {
    let client: Arc<dyn ModelClient> = match provider {
        Provider::Command => {
            let line = config.command.as_deref().context(
                "The command provider needs a command line.\n\
                 \n\
                 Configure it in sandloop.toml:\n\
                 [generator]\n\
                 provider = \"command\"\n\
                 command = \"llm -m gpt-4o\"",
            )?;
            Arc::new(CommandClient::from_command_line(line, config.timeout())?)
        }
        Provider::Http => Arc::new(HttpClient::new(config)?),
    };
    Ok(client)
}
