//! Static metadata scan of a spec, without resolving anything.
//!
//! Finds the inputs a document expects (for forms and pre-flight checks),
//! its named prompts, tools, file dependencies and assertions. No oracle is
//! involved and no file is read.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::directives::execution::ExecutionMetadata;
use crate::directives::{CasePattern, parse_cases};
use crate::lexer::{lex, protect_escapes};
use crate::tree::{Directive, build, walk};
use crate::vars::{bare_name, references};

/// Variables set by execution engines at run time, never by the user.
const INTERNAL_VARS: &[&str] = &["edited_content", "original_content", "best_path", "state"];

/// Name fragments that suggest a long free-text value.
const MULTILINE_HINTS: &[&str] = &[
    "description",
    "text",
    "content",
    "body",
    "prompt",
    "instructions",
    "message",
    "context",
    "details",
    "summary",
    "draft",
    "template",
];

const FILE_DIRECTIVES: &[&str] = &["embed", "summarize", "compress", "extract"];
const DOCUMENT_HINT: &str = "text or markdown document";
const SPEC_HINT: &str = "prompt spec (.promptspec.md)";

/// Lines after a `@note` in which a variable picks up its text as help.
const NOTE_REACH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Multiline,
    Select,
    Boolean,
    File,
}

/// One user-facing input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpecInput {
    pub name: String,
    pub input_type: InputType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hint: Option<String>,
    /// `@match`, `@if`, `@embed`, ... or `{{variable}}`.
    pub source: String,
}

impl SpecInput {
    fn new(name: &str, input_type: InputType, source: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            input_type,
            options: Vec::new(),
            default: None,
            description: None,
            file_hint: None,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpecMetadata {
    pub title: String,
    pub description: String,
    pub inputs: Vec<SpecInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<Map<String, Value>>,
    pub prompt_names: Vec<String>,
    pub tool_names: Vec<String>,
    pub refine_files: Vec<String>,
    pub embed_files: Vec<String>,
    pub assertions: Vec<String>,
    pub has_notes: bool,
}

impl SpecMetadata {
    pub fn input(&self, name: &str) -> Option<&SpecInput> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

pub fn scan(text: &str) -> SpecMetadata {
    let built = build(&lex(&protect_escapes(text)));
    let unit = built.unit;
    let mut directives: Vec<&Directive> = Vec::new();
    walk(&built.nodes, &mut |d| directives.push(d));

    let mut meta = SpecMetadata {
        title: title(text),
        description: description(text),
        has_notes: directives.iter().any(|d| d.name == "note"),
        ..SpecMetadata::default()
    };
    let notes = note_spans(&directives, unit);
    let mut inputs = Inputs::default();

    for d in &directives {
        match d.name.as_str() {
            "prompt" => push_unique(&mut meta.prompt_names, d.positional.first()),
            "tool" => push_unique(&mut meta.tool_names, d.positional.first()),
            "assert" => meta.assertions.push(d.args.clone()),
            "execute" if meta.execution.is_none() => {
                meta.execution = ExecutionMetadata::parse(d, unit).0.map(|m| m.to_json());
            }
            "match" => {
                let Some(subject) = d.positional.first().map(|s| bare_name(s)) else {
                    continue;
                };
                let mut input = SpecInput::new(subject, InputType::Select, "@match");
                input.options = parse_cases(d, unit)
                    .0
                    .into_iter()
                    .map(|case| match case.pattern {
                        CasePattern::Literal(v) => v,
                        CasePattern::Wildcard => "_".to_string(),
                    })
                    .collect();
                inputs.add(input);
            }
            "if" => {
                let Some(subject) = condition_subject(d) else {
                    continue;
                };
                let mut input = SpecInput::new(subject, InputType::Boolean, "@if");
                input.default = Some("false".to_string());
                inputs.add(input);
            }
            "refine" => {
                let Some(path) = d.positional.first() else {
                    continue;
                };
                match file_variable(path) {
                    Some(name) => inputs.add(file_input(&name, "@refine", SPEC_HINT)),
                    None => meta.refine_files.push(path.clone()),
                }
            }
            name if FILE_DIRECTIVES.contains(&name) => {
                let path = d
                    .params
                    .get_str("file")
                    .map(str::to_string)
                    .or_else(|| (name == "embed").then(|| d.positional.first().cloned()).flatten());
                let Some(path) = path else {
                    continue;
                };
                match file_variable(&path) {
                    Some(var) => inputs.add(file_input(&var, &format!("@{name}"), DOCUMENT_HINT)),
                    None => meta.embed_files.push(path),
                }
            }
            _ => {}
        }
    }

    for line in text.lines() {
        for name in references(line, |_| true) {
            if INTERNAL_VARS.contains(&name.as_str()) {
                continue;
            }
            let lower = name.to_lowercase();
            let input_type = if MULTILINE_HINTS.iter().any(|h| lower.contains(h)) {
                InputType::Multiline
            } else {
                InputType::Text
            };
            inputs.add(SpecInput::new(&name, input_type, "{{variable}}"));
        }
    }

    meta.inputs = inputs
        .list
        .into_iter()
        .map(|mut input| {
            input.description = note_hint(text, &input.name, &notes);
            input
        })
        .collect();
    meta
}

#[derive(Default)]
struct Inputs {
    seen: BTreeSet<String>,
    list: Vec<SpecInput>,
}

impl Inputs {
    /// The first directive to mention a variable decides its type.
    fn add(&mut self, input: SpecInput) {
        if self.seen.insert(input.name.clone()) {
            self.list.push(input);
        }
    }
}

fn push_unique(list: &mut Vec<String>, name: Option<&String>) {
    if let Some(name) = name
        && !list.contains(name)
    {
        list.push(name.clone());
    }
}

fn file_input(name: &str, source: &str, hint: &str) -> SpecInput {
    let mut input = SpecInput::new(name, InputType::File, source);
    input.file_hint = Some(hint.to_string());
    input
}

/// `{{name}}` used as a whole path.
fn file_variable(path: &str) -> Option<String> {
    references(path, |_| true).into_iter().next()
}

fn condition_subject(d: &Directive) -> Option<&str> {
    let mut tokens = d.args.split_whitespace();
    let first = tokens.next()?;
    let subject = if first == "not" { tokens.next()? } else { first };
    let name = bare_name(subject);
    (!name.is_empty()).then_some(name)
}

/// First `# ` heading.
fn title(text: &str) -> String {
    text.lines()
        .find_map(|l| l.trim().strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

/// Prose between the title and the first directive or next heading.
fn description(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut past_title = false;
    for line in text.lines() {
        let t = line.trim();
        if !past_title {
            past_title = t.starts_with("# ");
            continue;
        }
        if t.starts_with('@') || t.starts_with('#') {
            break;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

/// `(last line of the note, its text)` for every `@note` with a body.
fn note_spans(directives: &[&Directive], unit: usize) -> Vec<(usize, String)> {
    directives
        .iter()
        .filter(|d| d.name == "note")
        .map(|d| {
            let body = d.body_text(unit);
            let mut end = d.line + body.lines().count();
            // Trailing blank lines belong to the parent.
            end -= body.lines().rev().take_while(|l| l.trim().is_empty()).count();
            let text = [d.free_text(), body]
                .iter()
                .flat_map(|s| s.lines())
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (end, text)
        })
        .filter(|(_, text)| !text.is_empty())
        .collect()
}

/// Text of a note that ends at most [`NOTE_REACH`] lines before the
/// variable's first use.
fn note_hint(text: &str, name: &str, notes: &[(usize, String)]) -> Option<String> {
    let used_at = text
        .lines()
        .enumerate()
        .find(|(_, l)| references(l, |_| true).contains(name))
        .map(|(i, _)| i + 1)?;
    notes
        .iter()
        .find(|(end, _)| used_at > *end && used_at - end <= NOTE_REACH)
        .map(|(_, text)| text.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = "\
# Support Reply

Answers a customer ticket.

@note
  The customer's message, pasted verbatim.
{{customer_message}}

@match tone
  \"formal\" ==> Use formal language.
  \"casual\" ==> Keep it light.
  _ ==> Be neutral.

@if include_faq
  @embed file: faq.md

@summarize file: {{attachment}}
@refine base.promptspec.md
@prompt reply role: system
  Write the reply for {{product}}.
@tool lookup_order
  Find an order.
  - order_id: string (required)
@execute reflection
  max_iterations: 2
@assert contains a Reply section
";

    #[test]
    fn title_and_description() {
        let meta = scan(SPEC);
        assert_eq!(meta.title, "Support Reply");
        assert_eq!(meta.description, "Answers a customer ticket.");
        assert!(meta.has_notes);
    }

    #[test]
    fn inputs_by_kind() {
        let meta = scan(SPEC);
        let tone = meta.input("tone").unwrap();
        assert_eq!(tone.input_type, InputType::Select);
        assert_eq!(tone.options, vec!["formal", "casual", "_"]);

        let faq = meta.input("include_faq").unwrap();
        assert_eq!(faq.input_type, InputType::Boolean);
        assert_eq!(faq.default.as_deref(), Some("false"));

        assert_eq!(meta.input("attachment").unwrap().input_type, InputType::File);
        assert_eq!(
            meta.input("customer_message").unwrap().input_type,
            InputType::Multiline
        );
        assert_eq!(meta.input("product").unwrap().input_type, InputType::Text);
    }

    #[test]
    fn note_describes_following_variable() {
        let meta = scan(SPEC);
        assert_eq!(
            meta.input("customer_message").unwrap().description.as_deref(),
            Some("The customer's message, pasted verbatim.")
        );
        assert!(meta.input("product").unwrap().description.is_none());
    }

    #[test]
    fn structure_and_dependencies() {
        let meta = scan(SPEC);
        assert_eq!(meta.prompt_names, vec!["reply"]);
        assert_eq!(meta.tool_names, vec!["lookup_order"]);
        assert_eq!(meta.refine_files, vec!["base.promptspec.md"]);
        assert_eq!(meta.embed_files, vec!["faq.md"]);
        assert_eq!(meta.assertions, vec!["contains a Reply section"]);
        let execution = meta.execution.unwrap();
        assert_eq!(execution["type"], "reflection");
        assert_eq!(execution["max_iterations"], 2);
    }

    #[test]
    fn engine_variables_are_not_inputs() {
        let meta = scan("Revise {{original_content}} using {{notes}}.");
        assert!(meta.input("original_content").is_none());
        assert!(meta.input("notes").is_some());
    }
}
