//! Generated code artifacts.
//!
//! An [`Artifact`] is immutable once built. Construction strips a Markdown
//! code fence, runs the structural completeness check and applies the safety
//! policy exactly once; every later stage reads the cached results.

use serde::{Deserialize, Serialize};

use crate::safety::{self, SafetyVerdict};

/// A candidate program produced by the Generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Artifact {
    source: String,
    complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    incomplete_reason: Option<String>,
    verdict: SafetyVerdict,
}

impl Artifact {
    /// Builds an artifact from raw generator output.
    ///
    /// `generator_complete` is the collaborator's own truncation signal; the
    /// artifact is complete only when that signal and the structural check
    /// both agree.
    pub fn new(raw: &str, generator_complete: bool) -> Self {
        let source = strip_code_fence(raw);
        let verdict = safety::check(&source);

        let incomplete_reason = match check_structure(&source) {
            Err(issue) => Some(issue.to_string()),
            Ok(()) if !generator_complete => {
                Some("generator reported truncated output".to_string())
            }
            Ok(()) => None,
        };

        Self {
            complete: incomplete_reason.is_none(),
            source,
            incomplete_reason,
            verdict,
        }
    }

    /// Builds an artifact from a source file or literal that has no generator signal.
    pub fn from_source(source: &str) -> Self {
        Self::new(source, true)
    }

    /// Placeholder recorded when the Generator could not be reached.
    pub fn empty() -> Self {
        Self::new("", true)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_empty(&self) -> bool {
        self.source.trim().is_empty()
    }

    /// Why the artifact is incomplete, if it is.
    pub fn incomplete_reason(&self) -> Option<&str> {
        self.incomplete_reason.as_deref()
    }

    /// The safety verdict computed at construction.
    pub fn verdict(&self) -> &SafetyVerdict {
        &self.verdict
    }

    /// Classifies the artifact for backend selection.
    pub fn classify(&self) -> ArtifactClass {
        classify(&self.source)
    }
}

// ---- Code fences ----

/// Extracts the body of the first Markdown code fence, or returns the trimmed input.
pub(crate) fn strip_code_fence(raw: &str) -> String {
    let Some(start) = raw.find("```") else {
        return raw.trim_matches('\n').to_string();
    };

    let after_open = &raw[start + 3..];
    // Skip the info string (```python)
    let body = match after_open.find('\n') {
        Some(nl) => &after_open[nl + 1..],
        None => "",
    };

    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };

    body.trim_end().trim_start_matches('\n').to_string()
}

// ---- Structural completeness ----

/// Reason an artifact cannot be parsed to completion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum StructuralIssue {
    #[error("artifact is empty")]
    Empty,

    #[error("unterminated string literal on line {line}")]
    UnterminatedString { line: usize },

    #[error("unterminated triple-quoted string starting on line {line}")]
    UnterminatedTripleQuote { line: usize },

    #[error("unclosed '{open}' opened on line {line}")]
    UnclosedBracket { open: char, line: usize },

    #[error("unmatched '{close}' on line {line}")]
    UnmatchedBracket { close: char, line: usize },

    #[error("block header on line {line} has no body")]
    DanglingBlock { line: usize },

    #[error("line continuation at end of input")]
    TrailingContinuation,
}

#[derive(Debug, Clone, Copy)]
enum ScanState {
    Code,
    Comment,
    Str { quote: char, triple: bool, line: usize },
}

/// Checks that brackets and quotes balance and the input does not stop mid-statement.
pub(crate) fn check_structure(source: &str) -> Result<(), StructuralIssue> {
    if source.trim().is_empty() {
        return Err(StructuralIssue::Empty);
    }

    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut state = ScanState::Code;
    let mut line = 1;
    let mut last_significant: Option<(char, usize)> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match state {
            ScanState::Comment => {
                if c == '\n' {
                    state = ScanState::Code;
                }
            }
            ScanState::Str {
                quote,
                triple,
                line: start,
            } => {
                if c == '\\' {
                    if chars.get(i + 1) == Some(&'\n') {
                        line += 1;
                    }
                    i += 2;
                    continue;
                }
                if c == '\n' && !triple {
                    return Err(StructuralIssue::UnterminatedString { line: start });
                }
                if c == quote {
                    if !triple {
                        state = ScanState::Code;
                        last_significant = Some((c, line));
                    } else if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote)
                    {
                        state = ScanState::Code;
                        last_significant = Some((c, line));
                        i += 3;
                        continue;
                    }
                }
            }
            ScanState::Code => match c {
                '#' => state = ScanState::Comment,
                '\'' | '"' => {
                    let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                    state = ScanState::Str {
                        quote: c,
                        triple,
                        line,
                    };
                    if triple {
                        i += 3;
                        continue;
                    }
                }
                '(' | '[' | '{' => {
                    stack.push((c, line));
                    last_significant = Some((c, line));
                }
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => return Err(StructuralIssue::UnmatchedBracket { close: c, line }),
                    }
                    last_significant = Some((c, line));
                }
                c if c.is_whitespace() => {}
                _ => last_significant = Some((c, line)),
            },
        }
        if c == '\n' {
            line += 1;
        }
        i += 1;
    }

    if let ScanState::Str {
        triple, line: start, ..
    } = state
    {
        return Err(if triple {
            StructuralIssue::UnterminatedTripleQuote { line: start }
        } else {
            StructuralIssue::UnterminatedString { line: start }
        });
    }

    if let Some((open, line)) = stack.pop() {
        return Err(StructuralIssue::UnclosedBracket { open, line });
    }

    match last_significant {
        Some((':', line)) => Err(StructuralIssue::DanglingBlock { line }),
        Some(('\\', _)) => Err(StructuralIssue::TrailingContinuation),
        _ => Ok(()),
    }
}

// ---- Classification ----

/// Execution class, decided before a backend is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArtifactClass {
    /// Safe to hand to any backend.
    Runnable,
    /// May block or loop; must run somewhere that can be hard-killed.
    LongRunning { marker: &'static str },
    /// Cannot be exercised unattended by any backend.
    RequiresManualReview { marker: &'static str },
}

/// Interactive constructs. Nothing executes these unattended.
const MANUAL_REVIEW_MARKERS: &[&str] = &["input(", "mainloop("];

/// Constructs that block, sleep, or spin an event loop.
const LONG_RUNNING_MARKERS: &[&str] = &[
    "while True",
    "while 1:",
    "time.sleep(",
    "tkinter",
    "tk.",
    "serve_forever(",
    "asyncio.run(",
    "threading.",
    "signal.pause(",
];

pub(crate) fn classify(source: &str) -> ArtifactClass {
    if let Some(marker) = MANUAL_REVIEW_MARKERS.iter().find(|m| source.contains(*m)) {
        return ArtifactClass::RequiresManualReview { marker };
    }
    if let Some(marker) = LONG_RUNNING_MARKERS.iter().find(|m| source.contains(*m)) {
        return ArtifactClass::LongRunning { marker };
    }
    ArtifactClass::Runnable
}
