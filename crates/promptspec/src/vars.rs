//! Variable bindings and reference substitution.
//!
//! Two reference syntaxes are recognized:
//!
//! - `{{name}}`, which stops at the first `}}`
//! - `@name` / `@{name}`, where the bare form stops at the first character
//!   outside `[A-Za-z0-9_]`
//!
//! Substitution only touches references that are currently bound; the rest
//! are left in place for a later pass (or reported at assembly). Mustache
//! sections `{{#list}}...{{/list}}` and `{{^flag}}...{{/flag}}` render before
//! plain references, with `{{.}}` bound to the current item.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::lexer::{parse_header, protect_escapes};

/// Immutable-per-run mapping from variable name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings(BTreeMap<String, Value>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding (builder pattern).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Merge every key of a JSON object. Later values win.
    pub fn extend_from_json(&mut self, json: &Value) -> Result<(), String> {
        let object = json
            .as_object()
            .ok_or_else(|| "variables file must contain a JSON object".to_string())?;
        for (k, v) in object {
            self.0.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    /// Parse a `KEY=VALUE` assignment. `true`/`yes`/`1` and `false`/`no`/`0`
    /// become booleans; anything else stays a string.
    pub fn parse_assignment(item: &str) -> Option<(String, Value)> {
        let (key, value) = item.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        let value = match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Value::Bool(true),
            "false" | "no" | "0" => Value::Bool(false),
            _ => Value::String(value.to_string()),
        };
        Some((key.to_string(), value))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Display form of a bound value.
    pub fn display(&self, name: &str) -> Option<String> {
        self.get(name).map(display_value)
    }

    /// Truthiness of a bound value; `None` when unbound.
    pub fn truthy(&self, name: &str) -> Option<bool> {
        self.get(name).map(is_truthy)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Render a value for splicing into text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// `false`, `""`, `"0"`, `"false"`, `0`, `null`, and empty collections are
/// falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
        }
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_name_start) && chars.all(is_name_char)
}

/// Strip `{{ }}`, `@{ }`, or a leading `@` from a condition subject.
pub fn bare_name(token: &str) -> &str {
    let t = token.trim();
    if let Some(inner) = t.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        return inner.trim();
    }
    if let Some(inner) = t.strip_prefix("@{").and_then(|s| s.strip_suffix('}')) {
        return inner.trim();
    }
    t.strip_prefix('@').unwrap_or(t)
}

// ── Substitution ───────────────────────────────────────────────────

/// Result of one substitution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitution {
    pub text: String,
    /// Names referenced with `{{name}}` or `@{name}` that are not bound.
    pub unresolved: BTreeSet<String>,
}

/// Substitute every currently resolvable reference in `text`.
///
/// `is_directive(name)` protects `@name` tokens that are directive names.
/// Headers of condition directives (`@if`, `@match`) keep their subject as a
/// name: `@if {{flag}}` becomes `@if flag` rather than `@if true`.
pub fn substitute(
    text: &str,
    bindings: &Bindings,
    is_directive: impl Fn(&str) -> bool,
) -> Substitution {
    let sectioned = render_sections(text, bindings);
    let mut unresolved = BTreeSet::new();

    let lines: Vec<String> = sectioned
        .split('\n')
        .map(|line| {
            let trimmed = line.trim_start();
            if let Some(header) = parse_header(trimmed)
                && matches!(header.name.as_str(), "if" | "match")
            {
                return unwrap_condition(line);
            }
            let (indent, _) = line.split_at(line.len() - trimmed.len());
            let line = replace_mustache(line, indent, bindings, &mut unresolved);
            replace_at_refs(&line, indent, bindings, &is_directive, &mut unresolved)
        })
        .collect();

    Substitution {
        text: lines.join("\n"),
        unresolved,
    }
}

/// `(before, inner, after)` around the next `{{...}}` tag.
fn next_tag(text: &str) -> Option<(&str, &str, &str)> {
    let (before, open) = text.split_once("{{")?;
    let (inner, after) = open.split_once("}}")?;
    Some((before, inner, after))
}

/// A bound value ready to splice into a line indented by `indent`.
/// Continuation lines get the same indent so they stay in the enclosing body.
fn splice(value: &Value, indent: &str) -> String {
    let text = protect_escapes(&display_value(value));
    if indent.is_empty() || !text.contains('\n') {
        return text;
    }
    text.split('\n')
        .enumerate()
        .map(|(i, l)| {
            if i == 0 || l.trim().is_empty() {
                l.to_string()
            } else {
                format!("{indent}{l}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unwrap_condition(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some((before, inner, after)) = next_tag(rest) {
        out.push_str(before);
        out.push_str(inner.trim());
        rest = after;
    }
    out.push_str(rest);
    out
}

fn replace_mustache(
    line: &str,
    indent: &str,
    bindings: &Bindings,
    unresolved: &mut BTreeSet<String>,
) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some((before, raw, after)) = next_tag(rest) {
        let inner = raw.trim();
        out.push_str(before);
        match bindings.get(inner) {
            Some(value) if is_valid_name(inner) => out.push_str(&splice(value, indent)),
            _ => {
                if is_valid_name(inner) {
                    unresolved.insert(inner.to_string());
                }
                out.push_str("{{");
                out.push_str(raw);
                out.push_str("}}");
            }
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

fn replace_at_refs(
    line: &str,
    indent: &str,
    bindings: &Bindings,
    is_directive: &impl Fn(&str) -> bool,
    unresolved: &mut BTreeSet<String>,
) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let preceded_by_word = i > 0 && (is_name_char(chars[i - 1]) || chars[i - 1] == '.');
        if c != '@' || preceded_by_word {
            out.push(c);
            i += 1;
            continue;
        }

        // @{name}
        if chars.get(i + 1) == Some(&'{')
            && let Some(close) = chars[i + 2..].iter().position(|&c| c == '}')
        {
            let name: String = chars[i + 2..i + 2 + close].iter().collect();
            let name = name.trim();
            let end = i + 2 + close + 1;
            match bindings.get(name) {
                Some(value) => out.push_str(&splice(value, indent)),
                None => {
                    if is_valid_name(name) {
                        unresolved.insert(name.to_string());
                    }
                    out.extend(&chars[i..end]);
                }
            }
            i = end;
            continue;
        }

        // @name
        let mut end = i + 1;
        if chars.get(end).copied().is_some_and(is_name_start) {
            while end < chars.len() && is_name_char(chars[end]) {
                end += 1;
            }
            let name: String = chars[i + 1..end].iter().collect();
            if !is_directive(&name)
                && let Some(value) = bindings.get(&name)
            {
                out.push_str(&splice(value, indent));
                i = end;
                continue;
            }
        }
        out.push('@');
        i += 1;
    }
    out
}

// ── Sections ───────────────────────────────────────────────────────

fn render_sections(text: &str, bindings: &Bindings) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = [rest.find("{{#"), rest.find("{{^")].into_iter().flatten().min() {
        let (before, tag) = rest.split_at(open);
        let inverted = tag.starts_with("{{^");
        let Some((name, body)) = tag.get(3..).and_then(|t| t.split_once("}}")) else {
            break;
        };
        let name = name.trim();
        let body = body.strip_prefix('\n').unwrap_or(body);
        let close_tag = format!("{{{{/{name}}}}}");
        let Some((inner, after)) = body.split_once(close_tag.as_str()) else {
            // Unterminated: emit the opening tag literally and keep going.
            let (opening, tail) = rest.split_at(rest.len() - body.len());
            out.push_str(opening);
            rest = tail;
            continue;
        };
        let after = match after.strip_prefix('\n') {
            Some(stripped) if inner.ends_with('\n') => stripped,
            _ => after,
        };

        out.push_str(before);
        let value = bindings.get(name);
        if inverted {
            if !value.is_some_and(is_truthy) {
                out.push_str(&render_sections(inner, bindings));
            }
        } else {
            match value {
                Some(Value::Array(items)) => {
                    for item in items {
                        let rendered = inner.replace("{{.}}", &protect_escapes(&display_value(item)));
                        out.push_str(&render_sections(&rendered, bindings));
                    }
                }
                Some(v) if is_truthy(v) => {
                    let rendered = inner.replace("{{.}}", &protect_escapes(&display_value(v)));
                    out.push_str(&render_sections(&rendered, bindings));
                }
                _ => {}
            }
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Every variable name referenced in `text`, in any syntax.
pub fn references(text: &str, is_directive: impl Fn(&str) -> bool) -> BTreeSet<String> {
    let mut names = BTreeSet::new();

    let mut rest = text;
    while let Some((_, inner, after)) = next_tag(rest) {
        let inner = inner.trim();
        let inner = inner
            .strip_prefix('#')
            .or_else(|| inner.strip_prefix('^'))
            .unwrap_or(inner)
            .trim();
        if is_valid_name(inner) {
            names.insert(inner.to_string());
        }
        rest = after;
    }

    let chars: Vec<char> = text.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c != '@' || (i > 0 && (is_name_char(chars[i - 1]) || chars[i - 1] == '.')) {
            continue;
        }
        let (start, braced) = if chars.get(i + 1) == Some(&'{') {
            (i + 2, true)
        } else {
            (i + 1, false)
        };
        let mut end = start;
        while end < chars.len() && is_name_char(chars[end]) {
            end += 1;
        }
        let name: String = chars[start..end].iter().collect();
        if !is_valid_name(&name) || (braced && chars.get(end) != Some(&'}')) {
            continue;
        }
        if braced || !is_directive(&name) {
            names.insert(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_directives(_: &str) -> bool {
        false
    }

    #[test]
    fn mustache_and_at_forms() {
        let b = Bindings::new().with("topic", "cats").with("n", 3);
        let s = substitute("About {{topic}}, @topic and @{n} items.", &b, no_directives);
        assert_eq!(s.text, "About cats, cats and 3 items.");
        assert!(s.unresolved.is_empty());
    }

    #[test]
    fn unresolved_are_left_in_place() {
        let s = substitute("Hi {{name}} and @{other} and @nobody", &Bindings::new(), no_directives);
        assert_eq!(s.text, "Hi {{name}} and @{other} and @nobody");
        assert!(s.unresolved.contains("name"));
        assert!(s.unresolved.contains("other"));
        assert!(!s.unresolved.contains("nobody"));
    }

    #[test]
    fn directive_names_are_not_substituted() {
        let b = Bindings::new().with("audience", "kids");
        let s = substitute("@audience {{audience}}", &b, |n| n == "audience");
        assert_eq!(s.text, "@audience kids");
    }

    #[test]
    fn emails_are_not_references() {
        let b = Bindings::new().with("example", "X");
        let s = substitute("mail user@example.com", &b, no_directives);
        assert_eq!(s.text, "mail user@example.com");
    }

    #[test]
    fn condition_headers_keep_names() {
        let b = Bindings::new().with("tone", "formal");
        let s = substitute("@match {{tone}}\n  Tone is {{tone}}", &b, no_directives);
        assert_eq!(s.text, "@match tone\n  Tone is formal");
    }

    #[test]
    fn list_sections_iterate() {
        let b = Bindings::new().with("items", json!(["a", "b"]));
        let s = substitute("Items:\n{{#items}}\n- {{.}}\n{{/items}}\nEnd", &b, no_directives);
        assert_eq!(s.text, "Items:\n- a\n- b\nEnd");
    }

    #[test]
    fn falsy_and_inverted_sections() {
        let b = Bindings::new().with("flag", false);
        let s = substitute("{{#flag}}on{{/flag}}{{^flag}}off{{/flag}}", &b, no_directives);
        assert_eq!(s.text, "off");
    }

    #[test]
    fn escaped_values_stay_literal() {
        let b = Bindings::new().with("handle", "@@me");
        let s = substitute("{{handle}}", &b, no_directives);
        assert_eq!(crate::lexer::unescape(&s.text), "@me");
    }

    #[test]
    fn multiline_values_keep_the_reference_indent() {
        let b = Bindings::new().with("doc", "One.\n\nTwo.");
        let s = substitute("@summarize\n  {{doc}}\n  @{doc}\nAfter", &b, no_directives);
        assert_eq!(s.text, "@summarize\n  One.\n\n  Two.\n  One.\n\n  Two.\nAfter");
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!("0")));
        assert!(!is_truthy(&json!("false")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!(true)));
    }

    #[test]
    fn cli_assignments() {
        assert_eq!(
            Bindings::parse_assignment("verbose=yes"),
            Some(("verbose".into(), json!(true)))
        );
        assert_eq!(
            Bindings::parse_assignment("topic=cats=dogs"),
            Some(("topic".into(), json!("cats=dogs")))
        );
        assert_eq!(Bindings::parse_assignment("novalue"), None);
    }

    #[test]
    fn references_cover_all_forms() {
        let refs = references("{{a}} @b @{c} {{#d}}x{{/d}} @if", |n| n == "if");
        let names: Vec<&str> = refs.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn bare_name_strips_wrappers() {
        assert_eq!(bare_name("{{flag}}"), "flag");
        assert_eq!(bare_name("@{flag}"), "flag");
        assert_eq!(bare_name("@flag"), "flag");
        assert_eq!(bare_name("flag"), "flag");
    }
}
