//! Mock collaborators for testing.
//!
//! Provide configurable responses for end-to-end task loop tests without
//! reaching a real model.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Documenter, Generated, Generator, Reviewer};

/// A single mock response configuration.
#[derive(Debug, Clone)]
pub(crate) enum MockResponse {
    /// Return a complete program or critique.
    Success(String),
    /// Return output the collaborator reports as cut off.
    Truncated(String),
    /// Return an error with the given message.
    Error(String),
    /// Return an error that looks like a timeout.
    Timeout,
    /// Return an error that looks like a rate limit.
    RateLimit,
}

impl MockResponse {
    fn resolve(&self) -> Result<Generated> {
        match self {
            Self::Success(text) => Ok(Generated {
                source: text.clone(),
                complete: true,
            }),
            Self::Truncated(text) => Ok(Generated {
                source: text.clone(),
                complete: false,
            }),
            Self::Error(msg) => anyhow::bail!("{msg}"),
            Self::Timeout => anyhow::bail!("Model command 'mock' timed out after 120 seconds"),
            Self::RateLimit => anyhow::bail!("rate limit exceeded (429 Too Many Requests)"),
        }
    }
}

/// Shared response script. Cycles if invoked more times than responses.
#[derive(Debug, Clone)]
struct Script {
    responses: Arc<Vec<MockResponse>>,
    invocation_count: Arc<AtomicUsize>,
}

impl Script {
    fn new(responses: Vec<MockResponse>) -> Self {
        assert!(!responses.is_empty(), "mock needs at least one response");
        Self {
            responses: Arc::new(responses),
            invocation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn next(&self) -> Result<Generated> {
        let count = self.invocation_count.fetch_add(1, Ordering::SeqCst);
        self.responses[count % self.responses.len()].resolve()
    }

    fn count(&self) -> usize {
        self.invocation_count.load(Ordering::SeqCst)
    }
}

/// A mock Generator that records the feedback it received.
#[derive(Debug, Clone)]
pub(crate) struct MockGenerator {
    script: Script,
    feedback: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockGenerator {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Script::new(responses),
            feedback: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A generator that always returns `source`.
    pub fn always(source: &str) -> Self {
        Self::new(vec![MockResponse::Success(source.to_string())])
    }

    /// A generator that returns `sources` in order.
    pub fn sequence(sources: &[&str]) -> Self {
        Self::new(
            sources
                .iter()
                .map(|s| MockResponse::Success((*s).to_string()))
                .collect(),
        )
    }

    pub fn invocation_count(&self) -> usize {
        self.script.count()
    }

    /// Feedback passed on each call, in order.
    pub fn feedback(&self) -> Vec<Option<String>> {
        self.feedback.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn generate(&self, _task: &str, feedback: Option<&str>) -> Result<Generated> {
        self.feedback
            .lock()
            .unwrap()
            .push(feedback.map(str::to_string));
        self.script.next()
    }
}

/// A mock Reviewer.
#[derive(Debug, Clone)]
pub(crate) struct MockReviewer {
    script: Script,
    errors_seen: Arc<Mutex<Vec<String>>>,
}

impl MockReviewer {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Script::new(responses),
            errors_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A reviewer that always returns `critique`.
    pub fn always(critique: &str) -> Self {
        Self::new(vec![MockResponse::Success(critique.to_string())])
    }

    pub fn invocation_count(&self) -> usize {
        self.script.count()
    }

    /// Error text received on each call, in order.
    pub fn errors_seen(&self) -> Vec<String> {
        self.errors_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reviewer for MockReviewer {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn review(&self, _task: &str, _source: &str, error_text: &str) -> Result<String> {
        self.errors_seen.lock().unwrap().push(error_text.to_string());
        self.script.next().map(|g| g.source)
    }
}

/// A mock Documenter that echoes fixed text for both outputs.
#[derive(Debug, Clone)]
pub(crate) struct MockDocumenter {
    tests: Script,
    readme: Script,
}

impl MockDocumenter {
    pub fn new(tests: MockResponse, readme: MockResponse) -> Self {
        Self {
            tests: Script::new(vec![tests]),
            readme: Script::new(vec![readme]),
        }
    }

    pub fn invocation_count(&self) -> usize {
        self.tests.count() + self.readme.count()
    }
}

#[async_trait]
impl Documenter for MockDocumenter {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn write_tests(&self, _source: &str) -> Result<String> {
        self.tests.next().map(|g| g.source)
    }

    async fn write_readme(&self, _request: &str, _source: &str) -> Result<String> {
        self.readme.next().map(|g| g.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_generator_cycles_responses() {
        let generator = MockGenerator::sequence(&["first", "second"]);

        let r1 = generator.generate("t", None).await.unwrap();
        let r2 = generator.generate("t", Some("fb")).await.unwrap();
        let r3 = generator.generate("t", None).await.unwrap();

        assert_eq!(r1.source, "first");
        assert_eq!(r2.source, "second");
        assert_eq!(r3.source, "first"); // Cycles back
        assert_eq!(generator.invocation_count(), 3);
        assert_eq!(generator.feedback()[1].as_deref(), Some("fb"));
    }

    #[tokio::test]
    async fn test_mock_generator_truncated() {
        let generator = MockGenerator::new(vec![MockResponse::Truncated("def f(".into())]);
        assert!(!generator.generate("t", None).await.unwrap().complete);
    }

    #[tokio::test]
    async fn test_mock_errors_look_transient() {
        let generator = MockGenerator::new(vec![MockResponse::Timeout, MockResponse::RateLimit]);
        let timeout = generator.generate("t", None).await.unwrap_err();
        let limited = generator.generate("t", None).await.unwrap_err();
        assert!(crate::retry::is_retryable(&timeout));
        assert!(crate::retry::is_retryable(&limited));
    }

    #[tokio::test]
    async fn test_mock_reviewer_records_errors() {
        let reviewer = MockReviewer::always("check the divisor");
        let critique = reviewer
            .review("t", "1/0", "ZeroDivisionError")
            .await
            .unwrap();
        assert_eq!(critique, "check the divisor");
        assert_eq!(reviewer.errors_seen(), vec!["ZeroDivisionError".to_string()]);
    }
}
