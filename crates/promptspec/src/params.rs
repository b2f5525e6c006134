//! Directive arguments: values, ordered parameter maps, and the inline
//! argument tokenizer.
//!
//! A header's argument string mixes `key: value` pairs, bare flags, quoted
//! strings, and trailing free text:
//!
//! ```text
//! @refine base.md mingle: false
//! @audience "non-technical product managers"
//! @assert severity: error The prompt contains an Output Format section.
//! ```
//!
//! Which tokens count as keys is decided by the caller (usually from the
//! directive's registry entry), so free text such as `Note: be brief` is not
//! mistaken for a parameter.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Parse a raw token: booleans, integers, and floats are recognized;
    /// everything else stays a string.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>()
            && f.is_finite()
            && raw.contains('.')
        {
            return ParamValue::Float(f);
        }
        ParamValue::Str(unquote(raw).to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Str(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" => Some(true),
                "false" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Bool(b) => serde_json::Value::Bool(*b),
            ParamValue::Int(i) => serde_json::Value::from(*i),
            ParamValue::Float(f) => serde_json::Value::from(*f),
            ParamValue::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Insertion-ordered parameter map. Later inserts of an existing key
/// replace the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) -> Option<ParamValue> {
        let key = key.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.0.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ParamValue::as_bool)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect()
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl JsonSchema for Params {
    fn schema_name() -> String {
        "Params".to_string()
    }

    fn json_schema(generator: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        <BTreeMap<String, ParamValue>>::json_schema(generator)
    }
}

// ── Tokenizer ──────────────────────────────────────────────────────

/// Parsed inline arguments of one directive header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineArgs {
    pub params: Params,
    /// Positional tokens in order, with quotes removed.
    pub positional: Vec<String>,
    /// Repeated keys whose values differed.
    pub warnings: Vec<String>,
}

impl InlineArgs {
    /// Positional tokens joined back into free text.
    pub fn free_text(&self) -> String {
        self.positional.join(" ")
    }

    pub fn first(&self) -> Option<&str> {
        self.positional.first().map(String::as_str)
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// Split on whitespace, keeping `"quoted strings"` and `[bracketed, lists]`
/// together. Quotes are preserved on the token so callers can tell a quoted
/// value from a bare word.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut bracket_depth = 0usize;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '[' if !in_quotes => {
                bracket_depth += 1;
                current.push(c);
            }
            ']' if !in_quotes => {
                bracket_depth = bracket_depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes && bracket_depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Parse an argument string.
///
/// `is_key(k)` decides whether `k:` starts a parameter and `is_flag(k)`
/// whether a bare `k` is a boolean flag. Everything else is positional.
pub fn parse_inline(
    input: &str,
    is_key: impl Fn(&str) -> bool,
    is_flag: impl Fn(&str) -> bool,
) -> InlineArgs {
    let mut args = InlineArgs::default();
    let tokens = tokenize(input);
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];

        // `key: value` or `key:value`
        if !token.starts_with('"')
            && let Some((key, inline_value)) = token.split_once(':')
            && is_key(key)
        {
            let value = if inline_value.is_empty() {
                i += 1;
                tokens.get(i).map(String::as_str).unwrap_or("")
            } else {
                inline_value
            };
            record(&mut args, key, ParamValue::parse(value));
            i += 1;
            continue;
        }

        if !token.starts_with('"') && is_flag(token) {
            record(&mut args, token, ParamValue::Bool(true));
            i += 1;
            continue;
        }

        args.positional.push(unquote(token).to_string());
        i += 1;
    }

    args
}

fn record(args: &mut InlineArgs, key: &str, value: ParamValue) {
    if let Some(previous) = args.params.insert(key, value.clone())
        && previous != value
    {
        args.warnings.push(format!(
            "argument '{key}' given more than once ('{previous}' then '{value}'); \
             using '{value}', possibly accidental"
        ));
    }
}

/// Parse a `[a, b, "c d"]` list into its items.
pub fn parse_list(raw: &str) -> Vec<String> {
    let inner = raw
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(raw);
    inner
        .split(',')
        .map(|item| unquote(item.trim()).trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(allowed: &'static [&'static str]) -> impl Fn(&str) -> bool {
        move |k| allowed.iter().any(|a| *a == k)
    }

    #[test]
    fn value_parsing() {
        assert_eq!(ParamValue::parse("3"), ParamValue::Int(3));
        assert_eq!(ParamValue::parse("0.7"), ParamValue::Float(0.7));
        assert_eq!(ParamValue::parse("false"), ParamValue::Bool(false));
        assert_eq!(
            ParamValue::parse("majority-vote"),
            ParamValue::Str("majority-vote".into())
        );
        assert_eq!(ParamValue::parse("\"a b\""), ParamValue::Str("a b".into()));
    }

    #[test]
    fn refine_args() {
        let args = parse_inline("base.md mingle: false", keys(&["mingle"]), |_| false);
        assert_eq!(args.first(), Some("base.md"));
        assert_eq!(args.params.get_bool("mingle"), Some(false));
    }

    #[test]
    fn quoted_positional_keeps_spaces() {
        let args = parse_inline("\"non-technical product managers\"", |_| false, |_| false);
        assert_eq!(args.positional, vec!["non-technical product managers"]);
    }

    #[test]
    fn unknown_keys_stay_free_text() {
        let args = parse_inline(
            "severity: error Note: the prompt has a Summary section.",
            keys(&["severity"]),
            |_| false,
        );
        assert_eq!(args.params.get_str("severity"), Some("error"));
        assert_eq!(args.free_text(), "Note: the prompt has a Summary section.");
    }

    #[test]
    fn flags_desugar_to_true() {
        let args = parse_inline("is_active", |_| false, |k| k == "is_active");
        assert_eq!(args.params.get("is_active"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn repeated_key_last_wins_with_warning() {
        let args = parse_inline("mingle: true mingle: false", keys(&["mingle"]), |_| false);
        assert_eq!(args.params.get_bool("mingle"), Some(false));
        assert_eq!(args.params.len(), 1);
        assert_eq!(args.warnings.len(), 1);
        assert!(args.warnings[0].contains("possibly accidental"));
    }

    #[test]
    fn repeated_identical_key_is_silent() {
        let args = parse_inline("mingle: true mingle: true", keys(&["mingle"]), |_| false);
        assert!(args.warnings.is_empty());
    }

    #[test]
    fn compact_key_value() {
        let args = parse_inline("file:notes.md", keys(&["file"]), |_| false);
        assert_eq!(args.params.get_str("file"), Some("notes.md"));
    }

    #[test]
    fn list_parsing() {
        assert_eq!(
            parse_list("[celsius, \"fahrenheit\"]"),
            vec!["celsius", "fahrenheit"]
        );
    }

    #[test]
    fn params_serialize_in_order() {
        let mut p = Params::new();
        p.insert("samples", ParamValue::Int(5));
        p.insert("aggregation", ParamValue::Str("majority-vote".into()));
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"samples":5,"aggregation":"majority-vote"}"#);
    }
}
