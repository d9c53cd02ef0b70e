//! Prompt text for each collaborator role.

use super::Prompt;

const GENERATOR_SYSTEM: &str = "You are a senior Python developer. \
Your job is to write a clean, minimal Python program that fulfills a single, clearly defined task. \
The program runs unattended in a sandbox: never read from stdin, never open windows or event loops, \
never sleep or loop forever, and print the results you want to show. \
Only return valid Python code, no explanations or markdown.";

const REVIEWER_SYSTEM: &str = "You are a senior code reviewer. Your job is to analyze Python code \
and provide constructive feedback. Your feedback should focus on possible causes \
of errors, bad practices, or missing edge cases, especially in light of a reported failure.";

const TESTS_SYSTEM: &str = "You are a senior QA engineer writing pytest unit tests.

RULES:
1. Generate comprehensive pytest tests for ALL classes and functions
2. Include edge cases, error handling, and boundary conditions
3. Use pytest fixtures where appropriate
4. Use descriptive test names: test_<function>_<scenario>
5. Test both positive and negative cases
6. Output ONLY valid Python pytest code, no explanations or markdown";

const README_SYSTEM: &str = "You are a technical writer creating documentation.

Generate a professional README.md file with these sections:
1. Project Title and Description
2. Features
3. Installation
4. Usage (with code examples)
5. API Reference (brief overview of classes/functions)

Keep it concise but informative. Use proper Markdown formatting.
Output ONLY the README content, no explanations.";

/// Completion budget for the downstream test file.
pub(super) const TESTS_MAX_TOKENS: u32 = 2_500;

/// Completion budget for the README.
pub(super) const README_MAX_TOKENS: u32 = 2_000;

pub(super) fn generate(task: &str, feedback: Option<&str>) -> Prompt {
    let user = match feedback.map(str::trim).filter(|f| !f.is_empty()) {
        Some(feedback) => format!("Task: {task}\n\n{feedback}"),
        None => format!("Task: {task}"),
    };
    Prompt::new(GENERATOR_SYSTEM, user)
}

pub(super) fn review(task: &str, source: &str, error_text: &str) -> Prompt {
    Prompt::new(
        REVIEWER_SYSTEM,
        format!(
            "Task: {task}\n\nCode:\n{source}\n\nError:\n{error_text}\n\nWhat could be improved?"
        ),
    )
}

pub(super) fn test_suite(source: &str) -> Prompt {
    Prompt::new(
        TESTS_SYSTEM,
        format!(
            "Generate pytest unit tests for this code:\n\n```python\n{source}\n```\n\n\
             Generate comprehensive tests covering:\n\
             1. Normal operation\n\
             2. Edge cases (empty, single item, large values)\n\
             3. Error handling (invalid inputs, boundary conditions)\n\
             4. Property/method behavior\n\n\
             Output ONLY the pytest code:"
        ),
    )
    .with_max_tokens(TESTS_MAX_TOKENS)
}

pub(super) fn readme(request: &str, source: &str) -> Prompt {
    Prompt::new(
        README_SYSTEM,
        format!(
            "Create a README.md for this project:\n\n\
             **Project Description:** {request}\n\n\
             **Source Code:**\n```python\n{source}\n```\n\n\
             Generate the README.md:"
        ),
    )
    .with_max_tokens(README_MAX_TOKENS)
}
