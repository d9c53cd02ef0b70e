//! Model-backed Generator, Reviewer and Documenter.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{prompts, Documenter, Generated, Generator, ModelClient, Reviewer};
use crate::artifact::strip_code_fence;

/// Generator that asks a model for a complete program.
#[derive(Clone)]
pub(crate) struct ModelGenerator {
    client: Arc<dyn ModelClient>,
}

impl ModelGenerator {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Generator for ModelGenerator {
    fn name(&self) -> &'static str {
        self.client.name()
    }

    async fn generate(&self, task: &str, feedback: Option<&str>) -> Result<Generated> {
        let reply = self
            .client
            .complete(&prompts::generate(task, feedback))
            .await?;
        Ok(Generated {
            source: reply.text,
            complete: !reply.truncated,
        })
    }
}

/// Reviewer that asks a model what went wrong.
#[derive(Clone)]
pub(crate) struct ModelReviewer {
    client: Arc<dyn ModelClient>,
}

impl ModelReviewer {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Reviewer for ModelReviewer {
    fn name(&self) -> &'static str {
        self.client.name()
    }

    async fn review(&self, task: &str, source: &str, error_text: &str) -> Result<String> {
        let reply = self
            .client
            .complete(&prompts::review(task, source, error_text))
            .await?;
        Ok(reply.text)
    }
}

/// Writes the session's test file and README.
#[derive(Clone)]
pub(crate) struct ModelDocumenter {
    client: Arc<dyn ModelClient>,
}

impl ModelDocumenter {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Documenter for ModelDocumenter {
    fn name(&self) -> &'static str {
        self.client.name()
    }

    async fn write_tests(&self, source: &str) -> Result<String> {
        let reply = self.client.complete(&prompts::test_suite(source)).await?;
        Ok(strip_code_fence(&reply.text))
    }

    async fn write_readme(&self, request: &str, source: &str) -> Result<String> {
        let reply = self
            .client
            .complete(&prompts::readme(request, source))
            .await?;
        Ok(reply.text.trim().to_string())
    }
}
