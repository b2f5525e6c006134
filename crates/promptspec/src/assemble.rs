//! Final assembly of the resolved text.
//!
//! Top-level `@prompt NAME` blocks become named prompts. Everything else is
//! shared context: text before the first prompt is prepended to every
//! prompt and text after it is appended. Without named prompts the whole
//! text is the single `default` prompt.

use std::collections::BTreeMap;

use crate::lexer::{lex_with_unit, unescape};
use crate::registry;
use crate::tree::{Directive, DocumentNode, build, render, walk};
use crate::vars::{Bindings, substitute};

pub const DEFAULT_PROMPT: &str = "default";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembled {
    /// The shared context when named prompts exist, else the full text.
    pub composed_prompt: String,
    pub prompts: BTreeMap<String, String>,
    pub prompt_roles: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Split resolved `text` into prompts and clean it up. `unit` is the
/// indentation unit the text was rendered with (detected when `None`).
pub fn assemble(text: &str, unit: Option<usize>, unescape_output: bool) -> Assembled {
    let built = build(&lex_with_unit(text, unit));
    let unit = built.unit;
    let mut out = Assembled::default();

    let mut before: Vec<DocumentNode> = Vec::new();
    let mut after: Vec<DocumentNode> = Vec::new();
    let mut named: Vec<(String, String)> = Vec::new();

    for node in built.nodes {
        let d = match node {
            DocumentNode::Directive(d) if d.name == "prompt" => d,
            other if named.is_empty() => {
                before.push(other);
                continue;
            }
            other => {
                after.push(other);
                continue;
            }
        };
        let Some(name) = d.positional.first().cloned() else {
            out.warnings.push(format!(
                "{}: missing prompt name; body kept as shared text",
                d.label()
            ));
            let target = if named.is_empty() { &mut before } else { &mut after };
            target.extend(d.body);
            continue;
        };
        warn_nested(&d, &mut out.warnings);
        if named.iter().any(|(n, _)| *n == name) {
            out.warnings.push(format!(
                "{}: prompt '{name}' declared more than once; the later one wins",
                d.label()
            ));
            named.retain(|(n, _)| *n != name);
            out.prompt_roles.remove(&name);
        }
        if let Some(role) = d.params.get_str("role") {
            out.prompt_roles.insert(name.clone(), role.to_string());
        }
        named.push((name, d.body_text(unit)));
    }

    let before = render(&before, unit);
    let after = render(&after, unit);
    let finish = |s: &str| {
        let cleaned = cleanup(s);
        if unescape_output { unescape(&cleaned) } else { cleaned }
    };

    let full = join_parts(&[before.as_str(), after.as_str()]);
    out.warnings.extend(unresolved_warnings(text));
    out.composed_prompt = finish(&full);

    if named.is_empty() {
        out.prompts
            .insert(DEFAULT_PROMPT.to_string(), out.composed_prompt.clone());
    } else {
        for (name, body) in named {
            let text = join_parts(&[before.as_str(), body.as_str(), after.as_str()]);
            out.prompts.insert(name, finish(&text));
        }
    }
    out
}

fn warn_nested(d: &Directive, warnings: &mut Vec<String>) {
    walk(&d.body, &mut |inner| {
        if inner.name == "prompt" {
            warnings.push(format!(
                "{}: @prompt inside {} is not supported; kept as text",
                inner.label(),
                d.label()
            ));
        }
    });
}

fn join_parts(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn unresolved_warnings(text: &str) -> Vec<String> {
    substitute(text, &Bindings::new(), registry::is_reserved)
        .unresolved
        .into_iter()
        .map(|name| format!("unresolved variable '{name}' left in the output"))
        .collect()
}

/// Drop whole-line HTML comments, collapse runs of blank lines, trim.
pub fn cleanup(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_comment = false;
    for line in text.lines() {
        let t = line.trim();
        if in_comment {
            in_comment = !t.ends_with("-->");
            continue;
        }
        if t.starts_with("<!--") {
            in_comment = !t.ends_with("-->");
            continue;
        }
        if t.is_empty() && lines.last().is_none_or(|l| l.is_empty()) {
            continue;
        }
        lines.push(if t.is_empty() { "" } else { line.trim_end() });
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
