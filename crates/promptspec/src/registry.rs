//! Static directive table.
//!
//! Every directive the engine understands has one [`DirectiveSpec`]: its
//! [`DirectiveKind`], the parameters it recognizes (with allowed values and
//! defaults), and the [`Handler`] the evaluator dispatches to. Unknown names
//! are not errors; the evaluator keeps them verbatim and uses [`closest`] to
//! suggest a fix.

use crate::params::{InlineArgs, ParamValue, parse_inline};
use crate::semantic::Operation;

/// Broad category of a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    /// Deterministic text rewriting (conditionals, match, embed, assert).
    Structural,
    /// Delegated to the semantic-transform capability.
    Semantic,
    /// Contributes to out-of-band collections (prompts, tools, execution).
    Metadata,
    /// Inventory queries that only produce analysis notes.
    Debug,
    /// Evaluated and then discarded.
    MetaComment,
}

/// Which text a transform directive operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// The body if non-empty, else `file:`, else the enclosing scope.
    Body,
    /// Body and positional args are the instruction; the target is always
    /// the enclosing scope's text.
    Instruction,
    /// Body is the criterion; the target is `file:`, else the scope.
    Extract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Directives,
    Vars,
    Structure,
}

/// Evaluator dispatch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    If,
    Else,
    Match,
    Note,
    Prompt,
    Tool,
    Execute,
    Embed,
    Assert,
    Query(Query),
    Refine,
    Transform(Operation, TargetMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Text,
    Number,
    OneOf(&'static [&'static str]),
}

/// One recognized parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamDef {
    pub key: &'static str,
    pub ty: ParamType,
    pub default: Option<&'static str>,
}

const fn param(key: &'static str, ty: ParamType, default: Option<&'static str>) -> ParamDef {
    ParamDef { key, ty, default }
}

/// Registry entry for a directive.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveSpec {
    pub name: &'static str,
    pub kind: DirectiveKind,
    pub handler: Handler,
    pub params: &'static [ParamDef],
    /// Accept any `key: value` pair (e.g. `@execute`).
    pub open_params: bool,
    /// Positional text is meaningful (conditions, instructions, names).
    pub free_text: bool,
    pub summary: &'static str,
}

const ROLES: &[&str] = &["system", "user", "assistant"];
const SEVERITIES: &[&str] = &["warning", "error"];
const SAFETY: &[&str] = &["preserve", "allow"];

macro_rules! transform {
    ($name:literal, $op:ident, $mode:ident, $params:expr, $summary:literal) => {
        DirectiveSpec {
            name: $name,
            kind: DirectiveKind::Semantic,
            handler: Handler::Transform(Operation::$op, TargetMode::$mode),
            params: $params,
            open_params: false,
            free_text: true,
            summary: $summary,
        }
    };
}

/// Every directive the engine recognizes.
pub static DIRECTIVES: &[DirectiveSpec] = &[
    // ── Structural ──
    DirectiveSpec {
        name: "if",
        kind: DirectiveKind::Structural,
        handler: Handler::If,
        params: &[],
        open_params: false,
        free_text: true,
        summary: "include the body when a variable is truthy",
    },
    DirectiveSpec {
        name: "else",
        kind: DirectiveKind::Structural,
        handler: Handler::Else,
        params: &[],
        open_params: false,
        free_text: false,
        summary: "alternative branch of the preceding @if",
    },
    DirectiveSpec {
        name: "match",
        kind: DirectiveKind::Structural,
        handler: Handler::Match,
        params: &[],
        open_params: false,
        free_text: true,
        summary: "select the first case equal to a variable's value",
    },
    DirectiveSpec {
        name: "embed",
        kind: DirectiveKind::Structural,
        handler: Handler::Embed,
        params: &[param("file", ParamType::Text, None)],
        open_params: false,
        free_text: false,
        summary: "insert a file's contents verbatim",
    },
    DirectiveSpec {
        name: "assert",
        kind: DirectiveKind::Structural,
        handler: Handler::Assert,
        params: &[param(
            "severity",
            ParamType::OneOf(SEVERITIES),
            Some("warning"),
        )],
        open_params: false,
        free_text: true,
        summary: "check a condition against the resolved text",
    },
    // ── Metadata ──
    DirectiveSpec {
        name: "prompt",
        kind: DirectiveKind::Metadata,
        handler: Handler::Prompt,
        params: &[param("role", ParamType::OneOf(ROLES), None)],
        open_params: false,
        free_text: false,
        summary: "declare a named prompt",
    },
    DirectiveSpec {
        name: "tool",
        kind: DirectiveKind::Metadata,
        handler: Handler::Tool,
        params: &[],
        open_params: false,
        free_text: false,
        summary: "declare a callable function",
    },
    DirectiveSpec {
        name: "execute",
        kind: DirectiveKind::Metadata,
        handler: Handler::Execute,
        params: &[],
        open_params: true,
        free_text: false,
        summary: "declare the execution strategy",
    },
    // ── Meta-comment and debug ──
    DirectiveSpec {
        name: "note",
        kind: DirectiveKind::MetaComment,
        handler: Handler::Note,
        params: &[],
        open_params: false,
        free_text: true,
        summary: "author comment, removed from the output",
    },
    DirectiveSpec {
        name: "directives?",
        kind: DirectiveKind::Debug,
        handler: Handler::Query(Query::Directives),
        params: &[],
        open_params: false,
        free_text: false,
        summary: "list known and unknown directives",
    },
    DirectiveSpec {
        name: "vars?",
        kind: DirectiveKind::Debug,
        handler: Handler::Query(Query::Vars),
        params: &[],
        open_params: false,
        free_text: false,
        summary: "list referenced and bound variables",
    },
    DirectiveSpec {
        name: "structure?",
        kind: DirectiveKind::Debug,
        handler: Handler::Query(Query::Structure),
        params: &[],
        open_params: false,
        free_text: false,
        summary: "list headings of the resolved text",
    },
    // ── Semantic ──
    DirectiveSpec {
        name: "refine",
        kind: DirectiveKind::Semantic,
        handler: Handler::Refine,
        params: &[param("mingle", ParamType::Bool, Some("true"))],
        open_params: false,
        free_text: false,
        summary: "specialize an included base document",
    },
    transform!("expand", Expand, Instruction, &[], "add material without removing anything"),
    transform!(
        "contract",
        Contract,
        Instruction,
        &[param("safety", ParamType::OneOf(SAFETY), Some("preserve"))],
        "remove or tighten material"
    ),
    transform!("revise", Revise, Instruction, &[], "apply a targeted edit"),
    transform!("canon", Canon, Instruction, &[], "normalize terminology"),
    transform!("cohere", Cohere, Instruction, &[], "smooth transitions and ordering"),
    transform!("audience", Audience, Instruction, &[], "rewrite for an audience"),
    transform!("style", Style, Instruction, &[], "rewrite in a style"),
    transform!(
        "summarize",
        Summarize,
        Body,
        &[
            param("file", ParamType::Text, None),
            param("max_words", ParamType::Number, None),
        ],
        "summarize text or a file"
    ),
    transform!(
        "compress",
        Compress,
        Body,
        &[param("file", ParamType::Text, None)],
        "shorten while keeping meaning"
    ),
    transform!(
        "extract",
        Extract,
        Extract,
        &[param("file", ParamType::Text, None)],
        "keep only material matching a criterion"
    ),
    transform!(
        "generate_examples",
        GenerateExamples,
        Instruction,
        &[param("count", ParamType::Number, Some("3"))],
        "append worked examples"
    ),
    transform!("output_format", OutputFormat, Instruction, &[], "specify the output format"),
    transform!(
        "structural_constraints",
        StructuralConstraints,
        Instruction,
        &[],
        "impose structural constraints"
    ),
];

/// Look up a directive by name (debug queries include their `?`).
pub fn lookup(name: &str) -> Option<&'static DirectiveSpec> {
    DIRECTIVES.iter().find(|d| d.name == name)
}

pub fn is_directive_name(name: &str) -> bool {
    lookup(name).is_some()
}

/// A name that must not be read as an `@variable`: a directive, or a debug
/// query without its `?`.
pub fn is_reserved(name: &str) -> bool {
    is_directive_name(name) || DIRECTIVES.iter().any(|d| d.name.strip_suffix('?') == Some(name))
}

pub fn names() -> impl Iterator<Item = &'static str> {
    DIRECTIVES.iter().map(|d| d.name)
}

fn looks_like_key(token: &str) -> bool {
    let mut chars = token.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl DirectiveSpec {
    /// Parse a header's arguments against this directive's parameters,
    /// filling defaults and validating values. Problems are returned in
    /// [`InlineArgs::warnings`].
    pub fn parse_args(&self, raw: &str) -> InlineArgs {
        let mut args = parse_inline(
            raw,
            |k| (self.open_params && looks_like_key(k)) || self.params.iter().any(|p| p.key == k),
            |k| {
                self.params
                    .iter()
                    .any(|p| p.key == k && p.ty == ParamType::Bool)
            },
        );

        for def in self.params {
            match args.params.get(def.key).cloned() {
                None => {
                    if let Some(default) = def.default {
                        args.params.insert(def.key, ParamValue::parse(default));
                    }
                }
                Some(value) => {
                    if let Some(problem) = validate(def, &value) {
                        args.warnings
                            .push(format!("@{}: {problem}", self.name));
                        if let Some(default) = def.default {
                            args.params.insert(def.key, ParamValue::parse(default));
                        }
                    } else if def.ty == ParamType::Bool
                        && let Some(b) = value.as_bool()
                    {
                        args.params.insert(def.key, ParamValue::Bool(b));
                    }
                }
            }
        }

        if !self.free_text && !self.open_params {
            for token in &args.positional {
                if let Some(key) = token.strip_suffix(':')
                    && looks_like_key(key)
                {
                    let mut msg = format!("@{}: unrecognized argument '{key}'", self.name);
                    let known: Vec<&str> = self.params.iter().map(|p| p.key).collect();
                    if let Some(close) = closest(key, known.iter().copied()) {
                        msg.push_str(&format!("; did you mean '{close}'?"));
                    }
                    args.warnings.push(msg);
                }
            }
        }

        args
    }
}

fn validate(def: &ParamDef, value: &ParamValue) -> Option<String> {
    match def.ty {
        ParamType::Text => None,
        ParamType::Bool => value
            .as_bool()
            .is_none()
            .then(|| format!("'{}' expects true or false, got '{value}'", def.key)),
        ParamType::Number => value
            .as_f64()
            .is_none()
            .then(|| format!("'{}' expects a number, got '{value}'", def.key)),
        ParamType::OneOf(allowed) => {
            let ok = value
                .as_str()
                .is_some_and(|s| allowed.iter().any(|a| *a == s));
            (!ok).then(|| {
                format!(
                    "'{}' must be one of [{}], got '{value}'",
                    def.key,
                    allowed.join(", ")
                )
            })
        }
    }
}

// ── Suggestions ────────────────────────────────────────────────────

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// The candidate closest to `name`, if it is close enough to be a typo.
pub fn closest<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let limit = (name.chars().count() / 3).max(1);
    candidates
        .map(|c| (edit_distance(name, c), c))
        .filter(|(d, _)| *d <= limit)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_query_names() {
        assert_eq!(lookup("refine").unwrap().kind, DirectiveKind::Semantic);
        assert_eq!(lookup("vars?").unwrap().kind, DirectiveKind::Debug);
        assert!(lookup("vars").is_none());
        assert!(lookup("bogus").is_none());
    }

    #[test]
    fn names_are_unique() {
        let mut all: Vec<&str> = names().collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn refine_defaults_mingle_true() {
        let args = lookup("refine").unwrap().parse_args("base.md");
        assert_eq!(args.params.get_bool("mingle"), Some(true));
        assert_eq!(args.first(), Some("base.md"));
    }

    #[test]
    fn invalid_enum_value_falls_back_to_default() {
        let args = lookup("assert").unwrap().parse_args("severity: fatal X is set");
        assert_eq!(args.params.get_str("severity"), Some("warning"));
        assert_eq!(args.warnings.len(), 1);
        assert!(args.warnings[0].contains("must be one of"));
    }

    #[test]
    fn execute_accepts_any_key() {
        let args = lookup("execute")
            .unwrap()
            .parse_args("self-consistency samples: 5");
        assert_eq!(args.first(), Some("self-consistency"));
        assert_eq!(args.params.get("samples"), Some(&ParamValue::Int(5)));
    }

    #[test]
    fn misspelled_key_is_flagged() {
        let args = lookup("refine").unwrap().parse_args("base.md mingel: false");
        assert!(args.warnings.iter().any(|w| w.contains("did you mean 'mingle'")));
    }

    #[test]
    fn suggestions_for_typos() {
        assert_eq!(closest("audiance", names()), Some("audience"));
        assert_eq!(closest("summarise", names()), Some("summarize"));
        assert_eq!(closest("zzzzzz", names()), None);
    }
}
