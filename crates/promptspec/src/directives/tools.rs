//! `@tool` declarations and the run-scoped tool registry.
//!
//! A tool body is a description followed by one line per parameter:
//!
//! ```text
//! @tool get_weather
//!   Get current weather conditions.
//!   - location: string (required) — City name
//!   - units: string enum: [celsius, fahrenheit] default: celsius — Temperature units
//! ```
//!
//! Declarations become function-calling definitions
//! (`{"type": "function", "function": {...}}`) whose `parameters` object is
//! checked with `jsonschema` before it is registered.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::params::{ParamValue, parse_list, tokenize};
use crate::tree::Directive;

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl JsonType {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw.to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => JsonType::String,
            "integer" | "int" => JsonType::Integer,
            "number" | "float" => JsonType::Number,
            "boolean" | "bool" => JsonType::Boolean,
            "array" | "list" => JsonType::Array,
            "object" | "dict" | "map" => JsonType::Object,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }

    /// Convert a raw token into a JSON value of this type where possible.
    /// Values that do not convert stay strings, so the schema check can
    /// report them.
    fn value(self, raw: &str) -> Value {
        let parsed = ParamValue::parse(raw);
        match self {
            JsonType::String => Value::String(parsed.to_string()),
            JsonType::Integer | JsonType::Number => match parsed {
                ParamValue::Int(_) | ParamValue::Float(_) => parsed.to_json(),
                _ => Value::String(parsed.to_string()),
            },
            JsonType::Boolean => parsed
                .as_bool()
                .map_or_else(|| Value::String(parsed.to_string()), Value::Bool),
            JsonType::Array => Value::Array(parse_list(raw).into_iter().map(Value::String).collect()),
            JsonType::Object => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
            }
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: JsonType,
    pub required: bool,
    pub enum_values: Vec<Value>,
    pub default: Option<Value>,
    pub description: String,
}

impl ParamSpec {
    fn schema(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".into(), Value::String(self.ty.as_str().into()));
        if !self.description.is_empty() {
            prop.insert("description".into(), Value::String(self.description.clone()));
        }
        if !self.enum_values.is_empty() {
            prop.insert("enum".into(), Value::Array(self.enum_values.clone()));
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), default.clone());
        }
        Value::Object(prop)
    }
}

/// A parsed `@tool` directive.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolDeclaration {
    /// Parse a resolved `@tool` directive. Returns the declaration (if it has
    /// a name) and any problems found in the body.
    pub fn parse(directive: &Directive, unit: usize) -> (Option<Self>, Vec<String>) {
        let label = directive.label();
        let Some(name) = directive.positional.first().cloned() else {
            return (None, vec![format!("{label}: missing tool name; declaration ignored")]);
        };

        let mut warnings = Vec::new();
        let mut description: Vec<String> = Vec::new();
        let mut parameters: Vec<ParamSpec> = Vec::new();

        for line in directive.body_text(unit).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
                Some(item) => match parse_param(item) {
                    Ok((spec, problems)) => {
                        warnings.extend(
                            problems
                                .into_iter()
                                .map(|p| format!("{label}: parameter '{}': {p}", spec.name)),
                        );
                        if let Some(i) = parameters.iter().position(|p| p.name == spec.name) {
                            warnings.push(format!(
                                "{label}: parameter '{}' declared twice; keeping the later one",
                                spec.name
                            ));
                            parameters[i] = spec;
                        } else {
                            parameters.push(spec);
                        }
                    }
                    Err(e) => warnings.push(format!("{label}: {e}")),
                },
                None if parameters.is_empty() => description.push(line.to_string()),
                None => warnings.push(format!(
                    "{label}: text after the parameter list ignored: '{line}'"
                )),
            }
        }

        if description.is_empty() {
            warnings.push(format!("{label}: tool '{name}' has no description"));
        }

        let tool = Self {
            name,
            description: description.join(" "),
            parameters,
        };
        warnings.extend(tool.validate().into_iter().map(|w| format!("{label}: {w}")));
        (Some(tool), warnings)
    }

    /// The `parameters` JSON Schema object.
    pub fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.schema()))
            .collect();
        let required: Vec<Value> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| Value::String(p.name.clone()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check the generated schema and each default against its property.
    pub fn validate(&self) -> Vec<String> {
        let schema = self.parameters_schema();
        if let Err(e) = jsonschema::validator_for(&schema) {
            return vec![format!("tool '{}' has an invalid parameter schema: {e}", self.name)];
        }

        let mut problems = Vec::new();
        for param in &self.parameters {
            let Some(default) = &param.default else {
                continue;
            };
            let mut prop = param.schema();
            if let Value::Object(map) = &mut prop {
                map.remove("default");
            }
            let Ok(validator) = jsonschema::validator_for(&prop) else {
                continue;
            };
            problems.extend(validator.iter_errors(default).map(|e| {
                format!(
                    "tool '{}': default for '{}' does not fit its schema: {e}",
                    self.name, param.name
                )
            }));
        }
        problems
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef::new(&self.name, &self.description, self.parameters_schema())
    }
}

/// Split `name: type (required) enum: [a, b] default: x — description`.
fn parse_param(item: &str) -> Result<(ParamSpec, Vec<String>), String> {
    let (name, rest) = item
        .split_once(':')
        .ok_or_else(|| format!("parameter line without 'name: type': '{item}'"))?;
    let name = name.trim().trim_matches('`').to_string();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(format!("invalid parameter name in '{item}'"));
    }

    let (spec, description) = split_description(rest);
    let mut problems = Vec::new();
    let mut ty: Option<JsonType> = None;
    let mut required = false;
    let mut enum_raw: Option<String> = None;
    let mut default_raw: Option<String> = None;

    let tokens = tokenize(spec);
    let mut i = 0;
    while let Some(token) = tokens.get(i) {
        let lower = token.to_ascii_lowercase();
        let bare = lower.trim_matches(|c| c == '(' || c == ')' || c == ',');
        match bare {
            "required" => required = true,
            "optional" => required = false,
            _ if lower.starts_with("enum:") || lower.starts_with("default:") => {
                let (key, inline) = token.split_once(':').unwrap_or((token.as_str(), ""));
                let value = if inline.is_empty() {
                    i += 1;
                    tokens.get(i).cloned().unwrap_or_default()
                } else {
                    inline.to_string()
                };
                if key.eq_ignore_ascii_case("enum") {
                    enum_raw = Some(value);
                } else {
                    default_raw = Some(value);
                }
            }
            _ if ty.is_none() => match JsonType::parse(bare) {
                Some(t) => ty = Some(t),
                None => {
                    problems.push(format!("unknown type '{token}'; using string"));
                    ty = Some(JsonType::String);
                }
            },
            _ => problems.push(format!("unrecognized token '{token}'")),
        }
        i += 1;
    }

    let ty = ty.unwrap_or_else(|| {
        problems.push("no type given; using string".to_string());
        JsonType::String
    });
    let enum_values = enum_raw
        .map(|raw| parse_list(&raw).iter().map(|v| ty.value(v)).collect())
        .unwrap_or_default();
    let default = default_raw.map(|raw| ty.value(&raw));

    Ok((
        ParamSpec {
            name,
            ty,
            required,
            enum_values,
            default,
            description,
        },
        problems,
    ))
}

fn split_description(rest: &str) -> (&str, String) {
    for sep in ["—", " -- ", " - "] {
        if let Some((spec, desc)) = rest.split_once(sep) {
            return (spec, desc.trim().to_string());
        }
    }
    (rest, String::new())
}

// ── Function-calling definitions ───────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition in the OpenAI function-calling format.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ── Registry ───────────────────────────────────────────────────────

/// Tools declared in one compilation, unique by name, in first-declared
/// order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDeclaration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration. A later tool with the same name replaces the
    /// earlier one and the returned warning says so.
    pub fn register(&mut self, tool: ToolDeclaration) -> Option<String> {
        match self.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(slot) => {
                let name = tool.name.clone();
                *slot = tool;
                Some(format!(
                    "tool '{name}' declared more than once; the later declaration replaces the earlier one"
                ))
            }
            None => {
                self.tools.push(tool);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDeclaration> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.iter().map(ToolDeclaration::to_tool_def).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::tree::build;

    fn parse(text: &str) -> (Option<ToolDeclaration>, Vec<String>) {
        let built = build(&lex(text));
        let d = built.nodes[0].as_directive().unwrap();
        ToolDeclaration::parse(d, built.unit)
    }

    #[test]
    fn parses_description_and_params() {
        let (tool, warnings) = parse(
            "@tool get_weather\n  Get weather.\n  - location: string (required) — City\n  - units: string enum: [celsius, fahrenheit] — Temp units",
        );
        assert!(warnings.is_empty(), "{warnings:?}");
        let tool = tool.unwrap();
        assert_eq!(tool.description, "Get weather.");

        let def = serde_json::to_value(tool.to_tool_def()).unwrap();
        assert_eq!(def["type"], "function");
        assert_eq!(def["function"]["name"], "get_weather");
        let params = &def["function"]["parameters"];
        assert_eq!(params["type"], "object");
        assert_eq!(params["required"], json!(["location"]));
        assert_eq!(params["properties"]["units"]["enum"], json!(["celsius", "fahrenheit"]));
        assert_eq!(params["properties"]["location"]["description"], "City");
    }

    #[test]
    fn typed_defaults_and_ascii_separator() {
        let (tool, warnings) =
            parse("@tool search\n  Search.\n  - max_results: integer default: 5 -- How many");
        assert!(warnings.is_empty(), "{warnings:?}");
        let p = &tool.unwrap().parameters[0];
        assert_eq!(p.ty, JsonType::Integer);
        assert_eq!(p.default, Some(json!(5)));
        assert_eq!(p.description, "How many");
        assert!(!p.required);
    }

    #[test]
    fn default_outside_enum_is_reported() {
        let (_, warnings) =
            parse("@tool t\n  Desc.\n  - mode: string enum: [a, b] default: c");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("default for 'mode'"));
    }

    #[test]
    fn unknown_type_falls_back_to_string() {
        let (tool, warnings) = parse("@tool t\n  Desc.\n  - when: datetime");
        assert_eq!(tool.unwrap().parameters[0].ty, JsonType::String);
        assert!(warnings[0].contains("unknown type 'datetime'"));
    }

    #[test]
    fn missing_name_is_reported() {
        let (tool, warnings) = parse("@tool\n  Desc.");
        assert!(tool.is_none());
        assert!(warnings[0].contains("missing tool name"));
    }

    #[test]
    fn registry_later_declaration_wins_once() {
        let mut registry = ToolRegistry::new();
        let first = parse("@tool greet\n  Say hi.").0.unwrap();
        let second = parse("@tool greet\n  Say hello.").0.unwrap();
        assert!(registry.register(first).is_none());
        assert!(registry.register(second).is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("greet").unwrap().description, "Say hello.");
    }

    #[test]
    fn identical_redeclaration_still_warns() {
        let mut registry = ToolRegistry::new();
        let tool = parse("@tool greet\n  Say hi.").0.unwrap();
        assert!(registry.register(tool.clone()).is_none());
        assert!(registry.register(tool).is_some());
        assert_eq!(registry.len(), 1);
    }
}
