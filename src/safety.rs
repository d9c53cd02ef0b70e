//! Static safety policy applied to every artifact before execution.
//!
//! The policy is a fixed, ordered table of forbidden capability patterns.
//! Matching is plain substring search over the source text: false positives
//! are acceptable, false negatives on a listed pattern are not.

use serde::{Deserialize, Serialize};

/// A single forbidden-capability rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SafetyRule {
    /// Stable identifier reported in verdicts.
    pub id: &'static str,
    /// Substring that triggers the rule.
    pub pattern: &'static str,
    /// Human-readable description of the blocked capability.
    pub reason: &'static str,
}

/// Ordered rule table. First match wins.
pub(crate) const RULES: &[SafetyRule] = &[
    SafetyRule {
        id: "os-command-execution",
        pattern: "os.system",
        reason: "System command execution",
    },
    SafetyRule {
        id: "subprocess-execution",
        pattern: "subprocess.",
        reason: "Subprocess execution",
    },
    SafetyRule {
        id: "process-spawning",
        pattern: "Popen",
        reason: "Process spawning",
    },
    SafetyRule {
        id: "class-introspection",
        pattern: "__subclasses__",
        reason: "Class introspection attack",
    },
    SafetyRule {
        id: "global-namespace-access",
        pattern: "__globals__",
        reason: "Global namespace access",
    },
    SafetyRule {
        id: "code-object-manipulation",
        pattern: "__code__",
        reason: "Code object manipulation",
    },
    SafetyRule {
        id: "reflective-deserialization",
        pattern: "__reduce__",
        reason: "Pickle exploit",
    },
    SafetyRule {
        id: "file-execution",
        pattern: "execfile",
        reason: "File execution",
    },
    SafetyRule {
        id: "module-reload",
        pattern: "reload",
        reason: "Module reload",
    },
    SafetyRule {
        id: "os-command-execution",
        pattern: "os.popen",
        reason: "System command execution",
    },
    SafetyRule {
        id: "os-command-execution",
        pattern: "os.exec",
        reason: "System command execution",
    },
    SafetyRule {
        id: "os-command-execution",
        pattern: "os.spawn",
        reason: "System command execution",
    },
    SafetyRule {
        id: "process-spawning",
        pattern: "pty.spawn",
        reason: "Process spawning",
    },
    SafetyRule {
        id: "reflective-deserialization",
        pattern: "pickle.loads",
        reason: "Pickle exploit",
    },
    SafetyRule {
        id: "reflective-deserialization",
        pattern: "marshal.loads",
        reason: "Marshal exploit",
    },
];

/// Result of applying the safety policy to one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SafetyVerdict {
    /// Whether the artifact may reach an isolation backend.
    pub allowed: bool,
    /// Identifier of the first rule that matched.
    pub violated_rule: Option<String>,
    /// Violation message suitable for feedback and outcome text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SafetyVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            violated_rule: None,
            message: None,
        }
    }

    fn deny(rule: &SafetyRule) -> Self {
        Self {
            allowed: false,
            violated_rule: Some(rule.id.to_string()),
            message: Some(format!(
                "Security violation: {} ('{}' is not allowed)",
                rule.reason, rule.pattern
            )),
        }
    }
}

/// Checks source text against the rule table.
pub(crate) fn check(source: &str) -> SafetyVerdict {
    RULES
        .iter()
        .find(|rule| source.contains(rule.pattern))
        .map_or_else(SafetyVerdict::allow, SafetyVerdict::deny)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_source_is_allowed() {
        let verdict = check("print(1 + 1)\n");
        assert!(verdict.allowed);
        assert!(verdict.violated_rule.is_none());
        assert!(verdict.message.is_none());
    }

    #[test]
    fn test_os_system_is_rejected() {
        let verdict = check("import os\nos.system('rm -rf /')\n");
        assert!(!verdict.allowed);
        assert_eq!(
            verdict.violated_rule.as_deref(),
            Some("os-command-execution")
        );
        assert_eq!(
            verdict.message.as_deref(),
            Some("Security violation: System command execution ('os.system' is not allowed)")
        );
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // Both subprocess. and Popen match; subprocess. comes first in the table
        let verdict = check("import subprocess\nsubprocess.Popen(['ls'])\n");
        assert_eq!(
            verdict.violated_rule.as_deref(),
            Some("subprocess-execution")
        );
    }

    #[test]
    fn test_dunder_patterns_are_rejected() {
        for (source, rule) in [
            ("().__class__.__bases__[0].__subclasses__()", "class-introspection"),
            ("f.__globals__['x']", "global-namespace-access"),
            ("f.__code__ = g.__code__", "code-object-manipulation"),
            ("def __reduce__(self): pass", "reflective-deserialization"),
        ] {
            let verdict = check(source);
            assert!(!verdict.allowed, "expected {source} to be rejected");
            assert_eq!(verdict.violated_rule.as_deref(), Some(rule));
        }
    }

    #[test]
    fn test_false_positive_in_string_literal_is_accepted() {
        // Static matching does not look at context; a mention inside a string is blocked too
        let verdict = check("print('never call os.system')");
        assert!(!verdict.allowed);
    }

    #[test]
    fn test_reload_substring_matches() {
        let verdict = check("from importlib import reload\nreload(math)");
        assert_eq!(verdict.violated_rule.as_deref(), Some("module-reload"));
    }

    #[test]
    fn test_check_is_deterministic() {
        let source = "import pickle\npickle.loads(data)";
        assert_eq!(check(source), check(source));
    }

    #[test]
    fn test_rule_ids_are_kebab_case() {
        for rule in RULES {
            assert!(rule
                .id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '-'));
        }
    }
}
