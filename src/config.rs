use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::agent::Provider;
use crate::sandbox::{BackendKind, ExecutionLimits};

pub(crate) const CONFIG_FILE: &str = "sandloop.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub subprocess: SubprocessConfig,
    #[serde(default)]
    pub container: DockerConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub generator: ProviderConfig,
    #[serde(default)]
    pub reviewer: ProviderConfig,
}

/// Limits and backend selection shared by every execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Isolation method: "inprocess", "subprocess" or "container"
    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Enforced by the container and in-process backends
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Library namespaces artifacts may import
    #[serde(default = "default_allowed_capabilities")]
    pub allowed_capabilities: Vec<String>,

    /// Upper bound on simultaneously running executions
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Re-run on the next weaker backend when the requested one is unreachable
    #[serde(default)]
    pub fallback_on_unavailable: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            timeout_seconds: default_timeout_seconds(),
            max_memory_mb: default_max_memory_mb(),
            max_output_bytes: default_max_output_bytes(),
            allowed_capabilities: default_allowed_capabilities(),
            max_concurrent: default_max_concurrent(),
            fallback_on_unavailable: false,
        }
    }
}

impl ExecutionConfig {
    pub fn backend(&self) -> Result<BackendKind> {
        self.method.parse()
    }
}

/// Child-process backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubprocessConfig {
    /// Interpreter binary, resolved through PATH
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Name the artifact is written under in the scratch directory
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            file_name: default_file_name(),
        }
    }
}

/// Container backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_image")]
    pub image: String,

    /// Interpreter inside the image
    #[serde(default = "default_container_interpreter")]
    pub interpreter: String,

    /// CPU share (e.g. 0.5 = half a core)
    #[serde(default = "default_cpus")]
    pub cpus: f64,

    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,

    /// Size of the writable /tmp (e.g. "10m")
    #[serde(default = "default_tmpfs_size")]
    pub tmpfs_size: String,

    /// Daemon socket; local defaults when unset
    #[serde(default)]
    pub docker_host: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            interpreter: default_container_interpreter(),
            cpus: default_cpus(),
            pids_limit: default_pids_limit(),
            tmpfs_size: default_tmpfs_size(),
            docker_host: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Generator calls per task
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// Backoff for Generator/Reviewer invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    /// Add up to ±10% random jitter to each delay
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_base: default_exponential_base(),
            jitter: true,
        }
    }
}

/// Generator or Reviewer collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which provider to use: "http" or "command"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Command line for the "command" provider; the prompt is piped via stdin
    /// - Example: "llm -m gpt-4o"
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,

    /// OpenAI-compatible endpoint for the "http" provider
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the bearer token
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Tried in order when the current model is rate limited
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            command: None,
            timeout_seconds: default_provider_timeout(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            fallback_models: default_fallback_models(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ProviderConfig {
    /// Parse the provider string into a Provider enum
    pub fn get_provider(&self) -> Result<Provider> {
        self.provider.parse()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "subprocess".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_memory_mb() -> u64 {
    256
}

fn default_max_output_bytes() -> usize {
    10_000
}

fn default_allowed_capabilities() -> Vec<String> {
    [
        "math",
        "random",
        "datetime",
        "json",
        "re",
        "collections",
        "itertools",
        "functools",
        "string",
        "csv",
        "io",
        "statistics",
        "uuid",
        "dataclasses",
        "typing",
        "enum",
        "pathlib",
        "abc",
        "copy",
        "operator",
        "contextlib",
        "heapq",
        "bisect",
        "array",
        "textwrap",
        "difflib",
        "unittest",
        "doctest",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_file_name() -> String {
    "main.py".to_string()
}

fn default_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_container_interpreter() -> String {
    "python".to_string()
}

fn default_cpus() -> f64 {
    0.5
}

fn default_pids_limit() -> i64 {
    50
}

fn default_tmpfs_size() -> String {
    "10m".to_string()
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_provider() -> String {
    "http".to_string()
}

fn default_provider_timeout() -> u64 {
    120
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_fallback_models() -> Vec<String> {
    vec![
        "llama-3.1-8b-instant".to_string(),
        "gemma2-9b-it".to_string(),
        "mixtral-8x7b-32768".to_string(),
    ]
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1024
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Rejects values no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        self.execution.backend()?;
        self.generator
            .get_provider()
            .context("Invalid [generator] provider")?;
        self.reviewer
            .get_provider()
            .context("Invalid [reviewer] provider")?;

        let exec = &self.execution;
        if exec.timeout_seconds == 0 {
            anyhow::bail!("execution.timeout_seconds must be greater than 0");
        }
        if exec.max_memory_mb == 0 {
            anyhow::bail!("execution.max_memory_mb must be greater than 0");
        }
        if exec.max_output_bytes == 0 {
            anyhow::bail!("execution.max_output_bytes must be greater than 0");
        }
        if exec.max_concurrent == 0 {
            anyhow::bail!("execution.max_concurrent must be greater than 0");
        }
        if self.task.max_attempts == 0 {
            anyhow::bail!("task.max_attempts must be greater than 0");
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be greater than 0");
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            anyhow::bail!(
                "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                retry.base_delay_ms,
                retry.max_delay_ms
            );
        }
        if retry.exponential_base < 1.0 {
            anyhow::bail!(
                "retry.exponential_base must be at least 1.0, got {}",
                retry.exponential_base
            );
        }

        Ok(())
    }

    /// Execution limits for this run.
    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            timeout: Duration::from_secs(self.execution.timeout_seconds),
            max_memory_mb: self.execution.max_memory_mb,
            max_output_bytes: self.execution.max_output_bytes,
            allowed_capabilities: self.execution.allowed_capabilities.clone(),
        }
    }
}
