//! Scope/block builder: groups directive headers with the indented lines
//! beneath them into a [`DocumentNode`] tree, and renders a tree back to
//! text.
//!
//! Text nodes hold one line each, with indentation relative to the scope
//! that owns them. Splicing a directive's body into its parent therefore
//! dedents it by one level without any rewriting.

use crate::lexer::{Lexed, Line, LineKind};
use crate::params::{Params, parse_inline};
use crate::registry::{self, DirectiveSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentNode {
    /// One line of text (empty for a blank line).
    Text(String),
    Directive(Directive),
}

impl DocumentNode {
    pub fn is_blank(&self) -> bool {
        matches!(self, DocumentNode::Text(t) if t.trim().is_empty())
    }

    pub fn as_directive(&self) -> Option<&Directive> {
        match self {
            DocumentNode::Directive(d) => Some(d),
            DocumentNode::Text(_) => None,
        }
    }
}

/// A directive header plus its body.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    /// Raw argument string as written after the name.
    pub args: String,
    pub params: Params,
    pub positional: Vec<String>,
    pub body: Vec<DocumentNode>,
    /// Source line of the header in the pass that built it.
    pub line: usize,
    /// Extra depth relative to the owning scope, for headers indented under
    /// plain text rather than under another directive.
    pub indent: usize,
}

impl Directive {
    /// Build a directive with no body, parsing `args` against the registry.
    /// Returns argument warnings alongside.
    pub fn parse(name: &str, args: &str, line: usize) -> (Self, Vec<String>) {
        let parsed = match registry::lookup(name) {
            Some(spec) => spec.parse_args(args),
            None => parse_inline(args, |_| false, |_| false),
        };
        let warnings = parsed
            .warnings
            .into_iter()
            .map(|w| format!("line {line}: {w}"))
            .collect();
        let directive = Self {
            name: name.to_string(),
            args: args.to_string(),
            params: parsed.params,
            positional: parsed.positional,
            body: Vec::new(),
            line,
            indent: 0,
        };
        (directive, warnings)
    }

    pub fn spec(&self) -> Option<&'static DirectiveSpec> {
        registry::lookup(&self.name)
    }

    /// Positional arguments joined back into free text.
    pub fn free_text(&self) -> String {
        self.positional.join(" ")
    }

    /// The header line as written, without indentation.
    pub fn header(&self) -> String {
        if self.args.is_empty() {
            format!("@{}", self.name)
        } else {
            format!("@{} {}", self.name, self.args)
        }
    }

    /// Short location label used in diagnostics.
    pub fn label(&self) -> String {
        format!("@{} (line {})", self.name, self.line)
    }

    pub fn body_text(&self, unit: usize) -> String {
        render(&self.body, unit)
    }

    pub fn has_body(&self) -> bool {
        self.body.iter().any(|n| !n.is_blank())
    }
}

/// Output of [`build`].
#[derive(Debug, Clone, PartialEq)]
pub struct Built {
    pub nodes: Vec<DocumentNode>,
    pub unit: usize,
    /// Lexer warnings followed by argument warnings.
    pub warnings: Vec<String>,
}

/// Build the node tree for lexed input.
pub fn build(lexed: &Lexed) -> Built {
    let mut warnings = lexed.warnings.clone();
    let nodes = build_block(&lexed.lines, 0, lexed.unit, &mut warnings);
    Built {
        nodes,
        unit: lexed.unit,
        warnings,
    }
}

fn build_block(
    lines: &[Line],
    base: usize,
    unit: usize,
    warnings: &mut Vec<String>,
) -> Vec<DocumentNode> {
    let mut nodes = Vec::new();
    let mut i = 0;

    while let Some(line) = lines.get(i) {
        let rel = line.depth.saturating_sub(base);
        match &line.kind {
            LineKind::Blank => {
                nodes.push(DocumentNode::Text(String::new()));
                i += 1;
            }
            LineKind::Text => {
                nodes.push(DocumentNode::Text(format!(
                    "{}{}",
                    " ".repeat(rel * unit),
                    line.content
                )));
                i += 1;
            }
            LineKind::Header(header) => {
                // Body: following lines deeper than the header. Blank lines
                // do not close it, but trailing blanks belong to the parent.
                let mut end = i + 1;
                while lines
                    .get(end)
                    .is_some_and(|l| l.is_blank() || l.depth > line.depth)
                {
                    end += 1;
                }
                while end > i + 1 && lines[end - 1].is_blank() {
                    end -= 1;
                }

                let (mut directive, arg_warnings) =
                    Directive::parse(&header.name, &header.args, line.number);
                warnings.extend(arg_warnings);
                directive.body = build_block(&lines[i + 1..end], line.depth + 1, unit, warnings);
                directive.indent = rel;
                nodes.push(DocumentNode::Directive(directive));
                i = end;
            }
        }
    }

    nodes
}

// ── Rendering ──────────────────────────────────────────────────────

/// Serialize nodes back to text using `unit` spaces per level.
pub fn render(nodes: &[DocumentNode], unit: usize) -> String {
    let mut out = Vec::new();
    render_into(nodes, unit, 0, &mut out);
    out.join("\n")
}

fn render_into(nodes: &[DocumentNode], unit: usize, depth: usize, out: &mut Vec<String>) {
    for node in nodes {
        match node {
            DocumentNode::Text(text) if text.is_empty() => out.push(String::new()),
            DocumentNode::Text(text) => out.push(format!("{}{text}", " ".repeat(depth * unit))),
            DocumentNode::Directive(d) => {
                let level = depth + d.indent;
                out.push(format!("{}{}", " ".repeat(level * unit), d.header()));
                render_into(&d.body, unit, level + 1, out);
            }
        }
    }
}

/// Split handler output into text nodes, one per line.
pub fn text_nodes(text: &str) -> Vec<DocumentNode> {
    text.lines()
        .map(|l| DocumentNode::Text(l.trim_end().to_string()))
        .collect()
}

/// Visit every directive, parents before children.
pub fn walk<'a>(nodes: &'a [DocumentNode], visit: &mut impl FnMut(&'a Directive)) {
    for node in nodes {
        if let DocumentNode::Directive(d) = node {
            visit(d);
            walk(&d.body, visit);
        }
    }
}
