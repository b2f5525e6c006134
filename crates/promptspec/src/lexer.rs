//! Line lexer: indentation, directive headers, and the `@@` escape.
//!
//! The lexer turns raw text into logical [`Line`]s. Each line carries its raw
//! indentation, its depth in units of the document's indentation unit, and a
//! [`LineKind`]. Directive headers are recognized only at the start of a
//! logical line; `@word` anywhere else is left for the variable resolver.
//!
//! `@@` is collapsed into the private-use character [`ESCAPED_AT`] before any
//! other processing, so an escaped at-sign can never open a directive at any
//! depth. [`unescape`] turns it back into a literal `@` exactly once, at
//! assembly time.

/// Stand-in for an escaped `@@` while the document is being processed.
pub const ESCAPED_AT: char = '\u{E000}';

const TAB_WIDTH: usize = 4;

// ── Escapes ────────────────────────────────────────────────────────

/// Collapse every `@@` into [`ESCAPED_AT`].
pub fn protect_escapes(text: &str) -> String {
    text.replace("@@", &ESCAPED_AT.to_string())
}

/// Treat every `@` in `text` as literal (used for verbatim inclusions).
pub fn protect_all(text: &str) -> String {
    text.replace('@', &ESCAPED_AT.to_string())
}

/// Replace each [`ESCAPED_AT`] with a literal `@`.
pub fn unescape(text: &str) -> String {
    text.replace(ESCAPED_AT, "@")
}

/// Render escapes back as `@@` for text leaving the engine (oracle requests).
pub fn to_wire(text: &str) -> String {
    text.replace(ESCAPED_AT, "@@")
}

/// Inverse of [`to_wire`] for text coming back into the engine.
pub fn from_wire(text: &str) -> String {
    protect_escapes(text)
}

// ── Lines ──────────────────────────────────────────────────────────

/// A directive header recognized at the start of a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Directive name, including a trailing `?` for debug queries.
    pub name: String,
    /// Remainder of the line after the name, trimmed.
    pub args: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Text,
    Header(Header),
}

/// One logical line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 1-based line number.
    pub number: usize,
    /// Leading whitespace width in columns (tabs expand to 4).
    pub indent: usize,
    /// Indentation depth in units of [`Lexed::unit`].
    pub depth: usize,
    /// The line without leading and trailing whitespace.
    pub content: String,
    pub kind: LineKind,
}

impl Line {
    pub fn is_blank(&self) -> bool {
        matches!(self.kind, LineKind::Blank)
    }

    pub fn header(&self) -> Option<&Header> {
        match &self.kind {
            LineKind::Header(h) => Some(h),
            _ => None,
        }
    }
}

/// Output of [`lex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexed {
    pub lines: Vec<Line>,
    /// Indentation unit in columns, inferred from the first indented line.
    pub unit: usize,
    pub warnings: Vec<String>,
}

/// Recognize a directive header in a whitespace-stripped line.
///
/// A header is `@` followed by a name (`[A-Za-z_][A-Za-z0-9_-]*`), an
/// optional `?`, and then either the end of the line or whitespace.
pub fn parse_header(content: &str) -> Option<Header> {
    let rest = content.strip_prefix('@')?;
    let mut chars = rest.char_indices();
    let (_, first) = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }

    let mut end = rest.len();
    for (i, c) in chars {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            end = i;
            break;
        }
    }
    let (name, tail) = rest.split_at(end);

    let (name, tail) = match tail.strip_prefix('?') {
        Some(after) => (format!("{name}?"), after),
        None => (name.to_string(), tail),
    };

    if !(tail.is_empty() || tail.starts_with(char::is_whitespace)) {
        return None;
    }

    Some(Header {
        name,
        args: tail.trim().to_string(),
    })
}

fn measure_indent(raw: &str) -> (usize, &str) {
    let mut width = 0;
    for (i, c) in raw.char_indices() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
            _ => return (width, raw.split_at(i).1),
        }
    }
    (width, "")
}

/// Snap an indentation width to a depth, rounding ties to the shallower
/// level. Any non-zero indentation is at least depth 1.
fn snap(indent: usize, unit: usize) -> (usize, bool) {
    if indent == 0 {
        return (0, true);
    }
    let lower = indent / unit;
    let rem = indent % unit;
    let depth = if rem * 2 > unit { lower + 1 } else { lower };
    (depth.max(1), rem == 0)
}

/// Lex `text` into logical lines, inferring the indentation unit.
pub fn lex(text: &str) -> Lexed {
    lex_with_unit(text, None)
}

/// Lex with a known indentation unit. Later passes reuse the unit inferred
/// in the first one so spliced content cannot change how the rest of the
/// document nests.
pub fn lex_with_unit(text: &str, unit: Option<usize>) -> Lexed {
    let mut raw_lines: Vec<(usize, usize, String)> = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let (indent, rest) = measure_indent(raw);
        raw_lines.push((i + 1, indent, rest.trim_end().to_string()));
    }

    let unit = unit.filter(|u| *u > 0).unwrap_or_else(|| {
        raw_lines
            .iter()
            .find(|(_, indent, content)| *indent > 0 && !content.is_empty())
            .map(|(_, indent, _)| *indent)
            .unwrap_or(2)
    });

    let mut warnings = Vec::new();
    let mut first_inconsistent: Option<(usize, usize, usize)> = None;
    let mut inconsistent = 0usize;

    let lines = raw_lines
        .into_iter()
        .map(|(number, indent, content)| {
            if content.is_empty() {
                return Line {
                    number,
                    indent: 0,
                    depth: 0,
                    content,
                    kind: LineKind::Blank,
                };
            }
            let (depth, exact) = snap(indent, unit);
            if !exact {
                inconsistent += 1;
                first_inconsistent.get_or_insert((number, indent, depth));
            }
            let kind = match parse_header(&content) {
                Some(h) => LineKind::Header(h),
                None => LineKind::Text,
            };
            Line {
                number,
                indent,
                depth,
                content,
                kind,
            }
        })
        .collect();

    if let Some((number, indent, depth)) = first_inconsistent {
        let mut msg = format!(
            "line {number}: indentation of {indent} space(s) is not a multiple of the \
             document's {unit}-space unit; interpreted at depth {depth}"
        );
        if inconsistent > 1 {
            msg.push_str(&format!(" ({} more line(s) snapped)", inconsistent - 1));
        }
        warnings.push(msg);
    }

    Lexed {
        lines,
        unit,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_with_args() {
        let h = parse_header("@refine base.md mingle: false").unwrap();
        assert_eq!(h.name, "refine");
        assert_eq!(h.args, "base.md mingle: false");
    }

    #[test]
    fn debug_query_header() {
        let h = parse_header("@vars?").unwrap();
        assert_eq!(h.name, "vars?");
        assert!(h.args.is_empty());
    }

    #[test]
    fn not_headers() {
        assert!(parse_header("@{topic} is great").is_none());
        assert!(parse_header("@topic.").is_none());
        assert!(parse_header("email me @home").is_none());
        assert!(parse_header("@ alone").is_none());
        assert!(parse_header("@1st").is_none());
    }

    #[test]
    fn escaped_at_never_opens_a_directive() {
        let text = protect_escapes("@@if flag\n  @@note");
        let lexed = lex(&text);
        assert!(lexed.lines.iter().all(|l| l.header().is_none()));
        assert_eq!(unescape(&text), "@if flag\n  @note");
    }

    #[test]
    fn wire_round_trip() {
        let text = protect_escapes("user@@example.com");
        assert_eq!(to_wire(&text), "user@@example.com");
        assert_eq!(from_wire(&to_wire(&text)), text);
    }

    #[test]
    fn infers_unit_and_depth() {
        let lexed = lex("@if a\n    body\n        deeper\n@else\n    other");
        assert_eq!(lexed.unit, 4);
        let depths: Vec<usize> = lexed.lines.iter().map(|l| l.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 0, 1]);
        assert!(lexed.warnings.is_empty());
    }

    #[test]
    fn inconsistent_indent_warns_once_and_snaps() {
        let lexed = lex("@note\n    a\n      b\n     c");
        assert_eq!(lexed.warnings.len(), 1);
        assert!(lexed.warnings[0].contains("line 3"));
        assert!(lexed.warnings[0].contains("1 more line"));
        assert_eq!(lexed.lines[2].depth, 1);
        assert_eq!(lexed.lines[3].depth, 1);
    }

    #[test]
    fn fixed_unit_overrides_inference() {
        let lexed = lex_with_unit("code\n    indented\n  body", Some(2));
        assert_eq!(lexed.unit, 2);
        assert_eq!(lexed.lines[1].depth, 2);
        assert_eq!(lexed.lines[2].depth, 1);
    }

    #[test]
    fn tabs_expand() {
        let lexed = lex("@note\n\tinside");
        assert_eq!(lexed.lines[1].indent, 4);
        assert_eq!(lexed.lines[1].depth, 1);
    }

    #[test]
    fn blank_lines_are_blank() {
        let lexed = lex("a\n   \nb");
        assert!(lexed.lines[1].is_blank());
    }
}
