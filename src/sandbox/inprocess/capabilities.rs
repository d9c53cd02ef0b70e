//! Static capability surface of the in-process runtime.
//!
//! Every builtin with an exposure decision and every namespace the embedded
//! runtime provides is listed here. Nothing is discovered by reflection.

/// What happens to a builtin when an artifact runs in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exposure {
    /// Available to the artifact.
    Exposed,
    /// Deleted from the runtime's builtins before the artifact runs.
    Hidden,
    /// Library code needs it, so it stays in the runtime. Artifacts that call
    /// it directly are run by a process backend instead.
    RoutedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Capability {
    pub name: &'static str,
    pub exposure: Exposure,
}

const fn exposed(name: &'static str) -> Capability {
    Capability {
        name,
        exposure: Exposure::Exposed,
    }
}

const fn hidden(name: &'static str) -> Capability {
    Capability {
        name,
        exposure: Exposure::Hidden,
    }
}

const fn routed_out(name: &'static str) -> Capability {
    Capability {
        name,
        exposure: Exposure::RoutedOut,
    }
}

pub(crate) const BUILTINS: &[Capability] = &[
    exposed("print"),
    exposed("len"),
    exposed("abs"),
    exposed("min"),
    exposed("max"),
    exposed("sum"),
    exposed("str"),
    exposed("int"),
    exposed("float"),
    exposed("bool"),
    exposed("range"),
    exposed("sorted"),
    exposed("round"),
    exposed("list"),
    exposed("dict"),
    exposed("set"),
    exposed("tuple"),
    exposed("enumerate"),
    exposed("zip"),
    exposed("map"),
    exposed("filter"),
    exposed("any"),
    exposed("all"),
    exposed("reversed"),
    exposed("isinstance"),
    exposed("hasattr"),
    exposed("getattr"),
    exposed("setattr"),
    exposed("type"),
    exposed("repr"),
    hidden("open"),
    hidden("input"),
    hidden("breakpoint"),
    hidden("help"),
    hidden("exit"),
    hidden("quit"),
    routed_out("exec"),
    routed_out("eval"),
    routed_out("compile"),
    routed_out("__import__"),
    routed_out("globals"),
    routed_out("locals"),
    routed_out("vars"),
];

/// Namespaces the embedded runtime can import, natively or from its frozen
/// standard library.
pub(crate) const MODULES: &[&str] = &[
    "bisect",
    "cmath",
    "collections",
    "copy",
    "dataclasses",
    "datetime",
    "decimal",
    "enum",
    "fractions",
    "functools",
    "heapq",
    "itertools",
    "json",
    "math",
    "operator",
    "random",
    "re",
    "statistics",
    "string",
    "textwrap",
    "time",
    "typing",
];

#[cfg(test)]
pub(crate) fn builtin(name: &str) -> Option<Capability> {
    BUILTINS.iter().copied().find(|c| c.name == name)
}

pub(crate) fn with_exposure(exposure: Exposure) -> impl Iterator<Item = &'static str> {
    BUILTINS
        .iter()
        .filter(move |c| c.exposure == exposure)
        .map(|c| c.name)
}

/// Whether the runtime can import the root of `module`.
pub(crate) fn provides(module: &str) -> bool {
    let root = module.split('.').next().unwrap_or(module);
    MODULES.contains(&root)
}

/// First routed-out builtin the source calls directly, if any.
///
/// `re.compile(` and `my_eval(` are not calls of the builtin.
pub(crate) fn routed_out_call(source: &str) -> Option<&'static str> {
    with_exposure(Exposure::RoutedOut).find(|name| calls_name(source, name))
}

fn calls_name(source: &str, name: &str) -> bool {
    let needle = format!("{name}(");
    source.match_indices(&needle).any(|(at, _)| {
        !matches!(
            source[..at].chars().next_back(),
            Some(c) if c.is_alphanumeric() || c == '_' || c == '.'
        )
    })
}

/// Root namespaces named by `import` and `from ... import` statements.
///
/// Relative imports are skipped. Order follows the source, duplicates kept.
pub(crate) fn imported_roots(source: &str) -> Vec<String> {
    let mut roots = Vec::new();
    for statement in source.lines().flat_map(|line| line.split(';')) {
        let statement = statement.trim();
        if let Some(rest) = statement.strip_prefix("import ") {
            for clause in rest.split(',') {
                if let Some(module) = clause.split_whitespace().next() {
                    push_root(&mut roots, module);
                }
            }
        } else if let Some(rest) = statement.strip_prefix("from ") {
            if let Some(module) = rest.split_whitespace().next() {
                if !module.starts_with('.') {
                    push_root(&mut roots, module);
                }
            }
        }
    }
    roots
}

fn push_root(roots: &mut Vec<String>, module: &str) {
    let root = module.split('.').next().unwrap_or(module);
    if !root.is_empty() {
        roots.push(root.to_string());
    }
}
