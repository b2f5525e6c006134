//! Deterministic directive handlers.
//!
//! Conditionals, `@match`, assertions, and the debug inventory queries live
//! here; tool and execution parsing are in [`tools`] and [`execution`]. The
//! evaluator owns traversal and splicing; these functions only decide.

pub mod execution;
pub mod tools;

use std::collections::BTreeSet;

use crate::lexer::{LineKind, lex, protect_escapes};
use crate::registry::{self, closest};
use crate::tree::{Directive, DocumentNode};
use crate::vars::{Bindings, bare_name, references};

// ── @if ────────────────────────────────────────────────────────────

/// Outcome of an `@if` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub holds: bool,
    pub warning: Option<String>,
}

/// Evaluate `@if NAME`, `@if not NAME`, `@if NAME == value` or
/// `@if NAME != value`. An unbound variable makes the condition false.
pub fn evaluate_if(directive: &Directive, bindings: &Bindings) -> Condition {
    let tokens = &directive.positional;
    let (negate, rest) = match tokens.first().map(String::as_str) {
        Some("not") => (true, tokens.get(1..).unwrap_or_default()),
        Some(t) if t.starts_with('!') && t.len() > 1 => {
            let name = bare_name(t.trim_start_matches('!'));
            return finish(directive, bindings, name, None, true);
        }
        _ => (false, tokens.as_slice()),
    };

    let Some(subject) = rest.first() else {
        return Condition {
            holds: false,
            warning: Some(format!("{}: missing condition; skipping the block", directive.label())),
        };
    };

    let comparison = match (rest.get(1).map(String::as_str), rest.get(2)) {
        (Some("=="), Some(value)) => Some((value.as_str(), false)),
        (Some("!="), Some(value)) => Some((value.as_str(), true)),
        _ => None,
    };
    finish(directive, bindings, bare_name(subject), comparison, negate)
}

fn finish(
    directive: &Directive,
    bindings: &Bindings,
    name: &str,
    comparison: Option<(&str, bool)>,
    negate: bool,
) -> Condition {
    let Some(value) = bindings.get(name) else {
        return Condition {
            holds: false,
            warning: Some(format!(
                "{}: condition variable '{name}' is not bound; treating the condition as false",
                directive.label()
            )),
        };
    };
    let holds = match comparison {
        Some((expected, not_equal)) => {
            (crate::vars::display_value(value) == expected) != not_equal
        }
        None => crate::vars::is_truthy(value),
    };
    Condition {
        holds: holds != negate,
        warning: None,
    }
}

// ── @match ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasePattern {
    Literal(String),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub pattern: CasePattern,
    pub body: Vec<DocumentNode>,
}

/// Split a `@match` body into cases.
///
/// Case lines are `"literal" ==> inline text` or `"literal" ==>` followed by
/// a deeper block; `_ ==>` is the fallback. Lines deeper than a case line
/// belong to it whether or not it had inline text.
pub fn parse_cases(directive: &Directive, unit: usize) -> (Vec<MatchCase>, Vec<String>) {
    let mut cases: Vec<MatchCase> = Vec::new();
    let mut warnings = Vec::new();

    for node in &directive.body {
        match node {
            DocumentNode::Text(text) if text.trim().is_empty() => {
                if let Some(case) = cases.last_mut() {
                    case.body.push(DocumentNode::Text(String::new()));
                }
            }
            DocumentNode::Text(text) if text.starts_with(char::is_whitespace) => {
                match cases.last_mut() {
                    Some(case) => case.body.push(DocumentNode::Text(dedent(text, unit))),
                    None => warnings.push(format!(
                        "{}: text before the first case is ignored: '{}'",
                        directive.label(),
                        text.trim()
                    )),
                }
            }
            DocumentNode::Text(text) => match text.split_once("==>") {
                Some((pattern, inline)) => {
                    let pattern = pattern.trim();
                    let pattern = if pattern == "_" {
                        CasePattern::Wildcard
                    } else {
                        CasePattern::Literal(unquote(pattern).to_string())
                    };
                    let inline = inline.trim();
                    let body = if inline.is_empty() {
                        Vec::new()
                    } else {
                        vec![DocumentNode::Text(inline.to_string())]
                    };
                    cases.push(MatchCase { pattern, body });
                }
                None => warnings.push(format!(
                    "{}: case line without '==>' ignored: '{}'",
                    directive.label(),
                    text.trim()
                )),
            },
            DocumentNode::Directive(d) if d.indent > 0 => match cases.last_mut() {
                Some(case) => {
                    let mut nested = d.clone();
                    nested.indent -= 1;
                    case.body.push(DocumentNode::Directive(nested));
                }
                None => warnings.push(format!(
                    "{}: @{} before the first case is ignored",
                    directive.label(),
                    d.name
                )),
            },
            DocumentNode::Directive(d) => warnings.push(format!(
                "{}: @{} at case level is ignored; indent it under a case",
                directive.label(),
                d.name
            )),
        }
    }

    for case in &mut cases {
        while case.body.last().is_some_and(DocumentNode::is_blank) {
            case.body.pop();
        }
    }
    (cases, warnings)
}

/// Select the `@match` branch for the subject's value. `None` drops the
/// construct. At most one warning is produced for the selection itself.
pub fn evaluate_match(
    directive: &Directive,
    bindings: &Bindings,
    unit: usize,
) -> (Option<Vec<DocumentNode>>, Vec<String>) {
    let (cases, mut warnings) = parse_cases(directive, unit);
    let subject = bare_name(directive.positional.first().map_or("", String::as_str)).to_string();
    let fallback = cases
        .iter()
        .find(|c| c.pattern == CasePattern::Wildcard)
        .map(|c| c.body.clone());

    let Some(value) = bindings.display(&subject) else {
        warnings.push(format!(
            "{}: match subject '{subject}' is not bound; {}",
            directive.label(),
            if fallback.is_some() {
                "using the '_' case"
            } else {
                "construct removed"
            }
        ));
        return (fallback, warnings);
    };

    let hit = cases.iter().find_map(|c| match &c.pattern {
        CasePattern::Literal(lit) if *lit == value => Some(c.body.clone()),
        _ => None,
    });
    match hit.or(fallback) {
        Some(body) => (Some(body), warnings),
        None => {
            warnings.push(format!(
                "{}: no case matches {subject} = '{value}' and there is no '_' case; construct removed",
                directive.label()
            ));
            (None, warnings)
        }
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}

fn dedent(text: &str, unit: usize) -> String {
    let leading = text.len() - text.trim_start_matches(' ').len();
    text.split_at(leading.min(unit)).1.to_string()
}

// ── @assert ────────────────────────────────────────────────────────

/// Result of a structural assertion check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Holds,
    Fails(String),
    /// Not a condition the engine can check; ask the oracle.
    Undecided,
}

/// Check the structural forms of an assertion against `text`:
///
/// - `contains|has|includes [a|an|the] X section`
/// - `variable X is bound|set|defined` and `X is bound|set|defined`
/// - `contains "literal"`
/// - `mentions X`
pub fn check_assertion(condition: &str, text: &str, bindings: &Bindings) -> Verdict {
    let cond = condition.trim().trim_end_matches('.').trim();
    let lower = cond.to_ascii_lowercase();

    // Variable binding checks.
    for suffix in [" is bound", " is set", " is defined", " is provided"] {
        if let Some(head) = lower.strip_suffix(suffix) {
            let head_len = head.len();
            let subject = cond.get(..head_len).unwrap_or(head);
            let name = subject
                .rsplit(char::is_whitespace)
                .next()
                .map(bare_name)
                .unwrap_or_default();
            if name.is_empty() {
                return Verdict::Undecided;
            }
            return if bindings.is_bound(name) {
                Verdict::Holds
            } else {
                Verdict::Fails(format!("variable '{name}' is not bound"))
            };
        }
    }

    // Section presence.
    if let Some(head) = lower.strip_suffix(" section") {
        for verb in ["contains ", "has ", "includes "] {
            if let Some(at) = head.find(verb) {
                let start = at + verb.len();
                let raw = cond.get(start..head.len()).unwrap_or_default();
                let section = strip_article(raw).trim_matches('"');
                if section.is_empty() {
                    return Verdict::Undecided;
                }
                return if has_section(text, section) {
                    Verdict::Holds
                } else {
                    Verdict::Fails(format!("no '{section}' section found"))
                };
            }
        }
    }

    // Quoted literal.
    if let Some(at) = lower.find("contains \"") {
        let rest = cond.get(at + "contains \"".len()..).unwrap_or_default();
        if let Some((literal, _)) = rest.split_once('"') {
            return if text.contains(literal) {
                Verdict::Holds
            } else {
                Verdict::Fails(format!("text does not contain \"{literal}\""))
            };
        }
    }

    if let Some(at) = lower.find("mentions ") {
        let term = cond
            .get(at + "mentions ".len()..)
            .unwrap_or_default()
            .trim()
            .trim_matches('"');
        if !term.is_empty() {
            return if text.to_lowercase().contains(&term.to_lowercase()) {
                Verdict::Holds
            } else {
                Verdict::Fails(format!("text does not mention '{term}'"))
            };
        }
    }

    Verdict::Undecided
}

fn strip_article(s: &str) -> &str {
    let t = s.trim();
    for article in ["a ", "an ", "the ", "A ", "An ", "The "] {
        if let Some(rest) = t.strip_prefix(article) {
            return rest.trim();
        }
    }
    t
}

/// A heading, `Name:` label, or bold label equal to `name` (case-insensitive).
fn has_section(text: &str, name: &str) -> bool {
    text.lines().any(|line| {
        let t = line.trim();
        let heading = t.trim_start_matches('#').trim();
        let label = t.split_once(':').map_or("", |(k, _)| k).trim();
        let bold = t.trim_matches('*').trim_end_matches(':').trim();
        (t.starts_with('#') && heading.eq_ignore_ascii_case(name))
            || label.trim_matches('*').eq_ignore_ascii_case(name)
            || (t.starts_with("**") && bold.eq_ignore_ascii_case(name))
    })
}

/// Markdown headings of `text`, in order.
pub fn headings(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|h| !h.is_empty())
        .collect()
}

// ── Debug queries ──────────────────────────────────────────────────

/// What the source document uses, captured before evaluation starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub known: BTreeSet<String>,
    pub unknown: BTreeSet<String>,
    pub referenced: BTreeSet<String>,
}

impl Inventory {
    pub fn from_source(text: &str) -> Self {
        let text = protect_escapes(text);
        let lexed = lex(&text);
        let headers: BTreeSet<String> = lexed
            .lines
            .iter()
            .filter_map(|l| l.header().map(|h| h.name.clone()))
            .collect();
        let mut inv = Self {
            referenced: references(&text, |n| {
                registry::is_reserved(n) || headers.contains(n)
            }),
            ..Self::default()
        };
        for line in lexed.lines {
            let LineKind::Header(header) = line.kind else {
                continue;
            };
            if registry::is_directive_name(&header.name) {
                if matches!(header.name.as_str(), "if" | "match")
                    && let Some(subject) = header.args.split_whitespace().find(|t| *t != "not")
                {
                    let name = bare_name(subject.trim_start_matches('!'));
                    if !name.is_empty() {
                        inv.referenced.insert(name.to_string());
                    }
                }
                inv.known.insert(header.name);
            } else {
                inv.unknown.insert(header.name);
            }
        }
        inv
    }
}

/// An analysis note and a suggestion for one debug query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReport {
    pub note: String,
    pub suggestion: String,
}

fn list(items: impl IntoIterator<Item = String>) -> String {
    let items: Vec<String> = items.into_iter().collect();
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

pub fn directives_report(directive: &Directive, inv: &Inventory) -> QueryReport {
    let known = inv
        .known
        .iter()
        .filter(|n| !n.ends_with('?'))
        .map(|n| format!("@{n}"));
    let unknown: Vec<String> = inv
        .unknown
        .iter()
        .map(|n| match closest(n, registry::names()) {
            Some(c) => format!("@{n} (did you mean @{c}?)"),
            None => format!("@{n}"),
        })
        .collect();
    QueryReport {
        note: format!(
            "{}: {} known and {} unknown directive name(s) in the document",
            directive.label(),
            inv.known.len(),
            inv.unknown.len()
        ),
        suggestion: format!("directives: known {}; unknown {}", list(known), list(unknown)),
    }
}

pub fn vars_report(directive: &Directive, inv: &Inventory, bindings: &Bindings) -> QueryReport {
    let bound: Vec<String> = inv
        .referenced
        .iter()
        .filter(|n| bindings.is_bound(n))
        .cloned()
        .collect();
    let unbound: Vec<String> = inv
        .referenced
        .iter()
        .filter(|n| !bindings.is_bound(n))
        .cloned()
        .collect();
    let unused: Vec<String> = bindings
        .names()
        .filter(|n| !inv.referenced.contains(*n))
        .map(str::to_string)
        .collect();
    QueryReport {
        note: format!(
            "{}: {} variable(s) referenced, {} bound, {} unbound",
            directive.label(),
            inv.referenced.len(),
            bound.len(),
            unbound.len()
        ),
        suggestion: format!(
            "variables: bound {}; unbound {}; supplied but unused {}",
            list(bound),
            list(unbound),
            list(unused)
        ),
    }
}

pub fn structure_report(directive: &Directive, resolved: &str) -> QueryReport {
    let sections = headings(resolved);
    QueryReport {
        note: format!(
            "{}: {} section heading(s) in the resolved text",
            directive.label(),
            sections.len()
        ),
        suggestion: format!("structure: {}", list(sections)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::tree::build;

    fn directive(text: &str) -> (Directive, usize) {
        let built = build(&lex(text));
        let d = built.nodes[0].as_directive().unwrap().clone();
        (d, built.unit)
    }

    #[test]
    fn if_truthiness_and_negation() {
        let b = Bindings::new().with("on", true).with("off", "0");
        assert!(evaluate_if(&directive("@if on").0, &b).holds);
        assert!(!evaluate_if(&directive("@if off").0, &b).holds);
        assert!(evaluate_if(&directive("@if not off").0, &b).holds);
        assert!(evaluate_if(&directive("@if !off").0, &b).holds);
    }

    #[test]
    fn if_comparison() {
        let b = Bindings::new().with("tier", "pro");
        assert!(evaluate_if(&directive("@if tier == pro").0, &b).holds);
        assert!(evaluate_if(&directive("@if tier != \"free\"").0, &b).holds);
    }

    #[test]
    fn unbound_condition_is_false_with_warning() {
        let c = evaluate_if(&directive("@if flag\n  A").0, &Bindings::new());
        assert!(!c.holds);
        assert!(c.warning.unwrap().contains("'flag'"));
    }

    #[test]
    fn match_inline_and_block_cases() {
        let (d, unit) = directive(
            "@match mode\n  \"detailed\" ==>\n    One.\n    Two.\n  \"brief\" ==> Short.\n  _ ==> Default.",
        );
        let (cases, warnings) = parse_cases(&d, unit);
        assert!(warnings.is_empty());
        assert_eq!(cases.len(), 3);
        assert_eq!(
            cases[0].body,
            vec![
                DocumentNode::Text("One.".into()),
                DocumentNode::Text("Two.".into())
            ]
        );
        assert_eq!(cases[2].pattern, CasePattern::Wildcard);

        let b = Bindings::new().with("mode", "brief");
        let (body, w) = evaluate_match(&d, &b, unit);
        assert_eq!(body.unwrap(), vec![DocumentNode::Text("Short.".into())]);
        assert!(w.is_empty());
    }

    #[test]
    fn match_without_fallback_drops_with_one_warning() {
        let (d, unit) = directive("@match x\n  \"a\" ==> A\n  \"b\" ==> B");
        let (body, w) = evaluate_match(&d, &Bindings::new().with("x", "c"), unit);
        assert!(body.is_none());
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn match_nested_directive_is_dedented() {
        let (d, unit) = directive("@match role\n  \"eng\" ==>\n    @if senior\n      Lead.");
        let (body, _) = evaluate_match(&d, &Bindings::new().with("role", "eng"), unit);
        let body = body.unwrap();
        let nested = body[0].as_directive().unwrap();
        assert_eq!(nested.name, "if");
        assert_eq!(nested.indent, 0);
    }

    #[test]
    fn assertion_forms() {
        let text = "## Output Format\nReturn JSON.\nTone: friendly";
        let b = Bindings::new().with("user", "ada");
        assert_eq!(
            check_assertion("The prompt contains an Output Format section.", text, &b),
            Verdict::Holds
        );
        assert!(matches!(
            check_assertion("The prompt has a Safety section", text, &b),
            Verdict::Fails(_)
        ));
        assert_eq!(check_assertion("has a tone section", text, &b), Verdict::Holds);
        assert_eq!(check_assertion("variable user is bound", text, &b), Verdict::Holds);
        assert!(matches!(
            check_assertion("{{topic}} is set", text, &b),
            Verdict::Fails(_)
        ));
        assert_eq!(check_assertion("contains \"JSON\"", text, &b), Verdict::Holds);
        assert_eq!(check_assertion("mentions json", text, &b), Verdict::Holds);
        assert_eq!(
            check_assertion("The prompt specifies max response length", text, &b),
            Verdict::Undecided
        );
    }

    #[test]
    fn inventory_and_reports() {
        let src = "@if show\n  {{name}}\n@match tone\n  _ ==> x\n@audiance kids\n@vars?";
        let inv = Inventory::from_source(src);
        assert!(inv.known.contains("if") && inv.known.contains("match"));
        assert!(inv.unknown.contains("audiance"));
        assert_eq!(
            inv.referenced.iter().cloned().collect::<Vec<_>>(),
            vec!["name", "show", "tone"]
        );

        let (d, _) = directive("@directives?");
        let report = directives_report(&d, &inv);
        assert!(report.suggestion.contains("@if"));
        assert!(report.suggestion.contains("did you mean @audience?"));

        let b = Bindings::new().with("show", true).with("extra", 1);
        let report = vars_report(&d, &inv, &b);
        assert!(report.suggestion.contains("bound show"));
        assert!(report.suggestion.contains("unbound name, tone"));
        assert!(report.suggestion.contains("unused extra"));
    }

    #[test]
    fn structure_lists_headings() {
        let (d, _) = directive("@structure?");
        let report = structure_report(&d, "# Role\ntext\n## Output\n");
        assert_eq!(report.suggestion, "structure: Role, Output");
    }
}
