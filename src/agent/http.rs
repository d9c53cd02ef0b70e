//! OpenAI-compatible chat completions provider.
//!
//! Sends `POST {base_url}/chat/completions` with a bearer token read from the
//! configured environment variable. Works with Groq, OpenAI, OpenRouter and
//! local servers that speak the same protocol.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::{ModelClient, Prompt, Reply};
use crate::config::ProviderConfig;

/// Primary model, ordered fallbacks, and the models known to be rate limited.
///
/// Owned by one client. A model stays rate limited for the client's lifetime.
#[derive(Debug)]
pub(crate) struct ModelRoster {
    primary: String,
    fallbacks: Vec<String>,
    rate_limited: Mutex<HashSet<String>>,
}

impl ModelRoster {
    pub fn new(primary: impl Into<String>, fallbacks: Vec<String>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks,
            rate_limited: Mutex::new(HashSet::new()),
        }
    }

    /// The model to use next: the primary unless it is rate limited, then the
    /// first fallback that is not. When everything is limited, the primary.
    pub fn current(&self) -> String {
        let limited = self.limited();
        if !limited.contains(&self.primary) {
            return self.primary.clone();
        }
        self.fallbacks
            .iter()
            .find(|m| !limited.contains(*m))
            .unwrap_or(&self.primary)
            .clone()
    }

    pub fn mark_rate_limited(&self, model: &str) {
        self.limited().insert(model.to_string());
    }

    #[cfg(test)]
    pub fn is_rate_limited(&self, model: &str) -> bool {
        self.limited().contains(model)
    }

    /// Upper bound on requests for a single completion.
    pub fn max_tries(&self) -> usize {
        self.fallbacks.len() + 2
    }

    fn limited(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.rate_limited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ---- Wire types ----

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_reply(body: &str) -> Result<Reply> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse chat completion response: {body}"))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .context("Chat completion response has no choices")?;
    Ok(Reply {
        text: choice.message.content.unwrap_or_default().trim().to_string(),
        truncated: choice.finish_reason.as_deref() == Some("length"),
    })
}

/// Chat completions client with per-client model fallback.
#[derive(Debug)]
pub(crate) struct HttpClient {
    client: Client,
    endpoint: String,
    api_key_env: String,
    temperature: f32,
    max_tokens: u32,
    roster: ModelRoster,
}

impl HttpClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            roster: ModelRoster::new(config.model.clone(), config.fallback_models.clone()),
        })
    }

    pub fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).with_context(|| {
            format!(
                "Environment variable {} is not set.\n\
                 \n\
                 Export your API key, or point [generator].api_key_env at the variable that holds it.",
                self.api_key_env
            )
        })
    }

    fn request<'a>(&self, model: &'a str, prompt: &'a Prompt) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &prompt.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });
        ChatRequest {
            model,
            messages,
            temperature: self.temperature,
            max_tokens: prompt.max_tokens.unwrap_or(self.max_tokens),
        }
    }
}

#[async_trait]
impl ModelClient for HttpClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<Reply> {
        let api_key = self.api_key()?;
        let mut last_status = None;

        for _ in 0..self.roster.max_tries() {
            let model = self.roster.current();
            info!("Requesting completion from {}", model);

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&api_key)
                .json(&self.request(&model, prompt))
                .send()
                .await
                .with_context(|| format!("Request to {} failed", self.endpoint))?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!("Rate limited on {}, trying fallback", model);
                self.roster.mark_rate_limited(&model);
                last_status = Some(status);
                continue;
            }
            if !status.is_success() {
                anyhow::bail!("Chat completion failed with status {status}: {body}");
            }

            let reply = parse_reply(&body)?;
            debug!(
                "Completion from {}: {} bytes, truncated={}",
                model,
                reply.text.len(),
                reply.truncated
            );
            return Ok(reply);
        }

        anyhow::bail!(
            "All models rate limited (last status {})",
            last_status.unwrap_or(StatusCode::TOO_MANY_REQUESTS)
        )
    }
}
