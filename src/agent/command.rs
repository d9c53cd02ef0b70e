//! Command-line model provider
//!
//! Runs any CLI that reads a prompt on stdin and prints the completion:
//! ```bash
//! echo "$PROMPT" | llm -m gpt-4o
//! ```
//!
//! The system and user parts are joined into one prompt.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{ModelClient, Prompt, Reply};

/// Model provider backed by an external command.
#[derive(Debug, Clone)]
pub(crate) struct CommandClient {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClient {
    /// Splits `line` with shell quoting rules.
    pub fn from_command_line(line: &str, timeout: Duration) -> Result<Self> {
        let mut words = shell_words::split(line)
            .with_context(|| format!("Failed to parse command line: {line}"))?;
        if words.is_empty() {
            anyhow::bail!("The command provider needs a non-empty command line");
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            timeout,
        })
    }

    fn render(prompt: &Prompt) -> String {
        if prompt.system.is_empty() {
            prompt.user.clone()
        } else {
            format!("{}\n\n{}", prompt.system, prompt.user)
        }
    }

    async fn run(&self, input: &str) -> Result<String> {
        debug!("Command args: {:?}", self.args);

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to run model command '{}'.\n\
                     \n\
                     Make sure it is installed and on PATH, or configure it in sandloop.toml:\n\
                     [generator]\n\
                     provider = \"command\"\n\
                     command = \"/full/path/to/tool --flags\"",
                    self.program
                )
            })?;

        // A command that exits without reading its input surfaces through its exit status.
        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(input.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e).context("Failed to write prompt to model command");
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for model command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Model command stderr: {}", stderr);
            anyhow::bail!(
                "Model command '{}' failed with exit code {:?}:\n{}",
                self.program,
                output.status.code(),
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ModelClient for CommandClient {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<Reply> {
        info!("Running model command: {}", self.program);
        let input = Self::render(prompt);

        let text = match tokio::time::timeout(self.timeout, self.run(&input)).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!(
                "Model command '{}' timed out after {} seconds",
                self.program,
                self.timeout.as_secs()
            ),
        };

        debug!("Output length: {} bytes", text.len());
        Ok(Reply {
            text: text.trim().to_string(),
            truncated: false,
        })
    }
}
