//! Names defined by earlier passing artifacts in the same session.
//!
//! Later tasks get a compact summary so the Generator reuses existing
//! classes and functions instead of redefining them.

use std::collections::BTreeSet;

/// Shown when nothing has passed yet.
pub(crate) const EMPTY_CONTEXT: &str = "No previous context. This is the first task.";

/// Class bodies longer than this are cut in the summary.
const MAX_CLASS_LINES: usize = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SharedContext {
    /// Class name and its source, in definition order.
    classes: Vec<(String, String)>,
    /// Function name and its signature line, in definition order.
    functions: Vec<(String, String)>,
    imports: BTreeSet<String>,
    /// Every passing artifact, in task order.
    sources: Vec<String>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.functions.is_empty() && self.imports.is_empty()
    }

    /// Records the top-level definitions and imports of a passing artifact.
    /// A name defined again replaces the earlier definition.
    pub fn add_passing(&mut self, source: &str) {
        for def in top_level_definitions(source) {
            let slot = match def.kind {
                DefKind::Class => &mut self.classes,
                DefKind::Function => &mut self.functions,
            };
            match slot.iter_mut().find(|(name, _)| *name == def.name) {
                Some(existing) => existing.1 = def.text,
                None => slot.push((def.name, def.text)),
            }
        }

        for line in source.lines().map(str::trim) {
            if line.starts_with("import ") || line.starts_with("from ") {
                self.imports.insert(line.to_string());
            }
        }

        self.sources.push(source.to_string());
    }

    #[cfg(test)]
    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[cfg(test)]
    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Summary for Generator prompts, or `None` when there is nothing yet.
    pub fn prompt_context(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.summary())
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.classes.is_empty() {
            let blocks: Vec<String> = self
                .classes
                .iter()
                .map(|(name, code)| format!("### {name}\n```python\n{code}\n```"))
                .collect();
            parts.push(format!(
                "## Already Defined Classes (DO NOT REDEFINE)\n{}",
                blocks.join("\n\n")
            ));
        }

        let signatures: Vec<String> = self
            .functions
            .iter()
            .filter(|(name, _)| name != "main")
            .map(|(_, sig)| format!("- `{sig}`"))
            .collect();
        if !signatures.is_empty() {
            parts.push(format!(
                "## Already Defined Functions\n{}",
                signatures.join("\n")
            ));
        }

        if !self.imports.is_empty() {
            let imports: Vec<&str> = self.imports.iter().map(String::as_str).collect();
            parts.push(format!(
                "## Available Imports\n```python\n{}\n```",
                imports.join("\n")
            ));
        }

        if parts.is_empty() {
            EMPTY_CONTEXT.to_string()
        } else {
            parts.join("\n\n")
        }
    }

    /// All passing artifacts joined, for the downstream generation step.
    pub fn combined_source(&self) -> String {
        self.sources.join("\n\n")
    }
}

// ---- Definition scanning ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefKind {
    Class,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Definition {
    kind: DefKind,
    name: String,
    /// Class: the (possibly cut) body. Function: the signature line.
    text: String,
}

fn definition_name(rest: &str) -> Option<String> {
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

/// Column-0 `class` and `def` statements with their extent.
fn top_level_definitions(source: &str) -> Vec<Definition> {
    let lines: Vec<&str> = source.lines().collect();
    let mut defs = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(rest) = line.strip_prefix("class ") {
            let Some(name) = definition_name(rest) else {
                continue;
            };
            let body = block_lines(&lines, i);
            let text = if body.len() > MAX_CLASS_LINES {
                let mut cut = body[..MAX_CLASS_LINES].join("\n");
                cut.push_str(&format!(
                    "\n    # ... ({} more lines)",
                    body.len() - MAX_CLASS_LINES
                ));
                cut
            } else {
                body.join("\n")
            };
            defs.push(Definition {
                kind: DefKind::Class,
                name,
                text,
            });
        } else if let Some(rest) = line
            .strip_prefix("def ")
            .or_else(|| line.strip_prefix("async def "))
        {
            let Some(name) = definition_name(rest) else {
                continue;
            };
            defs.push(Definition {
                kind: DefKind::Function,
                name,
                text: line.trim_end().trim_end_matches(':').to_string(),
            });
        }
    }
    defs
}

/// The header line at `start` plus every following indented or blank line.
fn block_lines<'a>(lines: &[&'a str], start: usize) -> Vec<&'a str> {
    let mut block = vec![lines[start]];
    for line in &lines[start + 1..] {
        if !line.trim().is_empty() && !line.starts_with([' ', '\t']) {
            break;
        }
        block.push(*line);
    }
    while block.len() > 1 && block.last().is_some_and(|l| l.trim().is_empty()) {
        block.pop();
    }
    block
}
