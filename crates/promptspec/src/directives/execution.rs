//! `@execute` metadata.
//!
//! ```text
//! @execute self-consistency
//!   samples: 5
//!   aggregation: majority-vote
//! ```
//!
//! The strategy and its parameters pass through to the output untouched;
//! running them is the job of an execution engine. Only one declaration is
//! effective per compilation.

use serde_json::{Map, Value};

use crate::engines;
use crate::params::{ParamValue, Params};
use crate::registry::closest;
use crate::tree::Directive;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionMetadata {
    pub strategy_type: String,
    pub params: Params,
}

impl ExecutionMetadata {
    pub fn new(strategy_type: impl Into<String>) -> Self {
        Self {
            strategy_type: strategy_type.into(),
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Parse a resolved `@execute` directive: inline arguments first, then
    /// `key: value` body lines (body values override inline ones).
    pub fn parse(directive: &Directive, unit: usize) -> (Option<Self>, Vec<String>) {
        let label = directive.label();
        let mut warnings = Vec::new();
        let mut params = directive.params.clone();

        for line in directive.body_text(unit).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((key, value)) if !key.trim().is_empty() => {
                    params.insert(key.trim(), ParamValue::parse(value));
                }
                _ => warnings.push(format!("{label}: expected 'key: value', got '{line}'")),
            }
        }

        let strategy = directive
            .positional
            .first()
            .cloned()
            .or_else(|| take_str(&mut params, "type"))
            .or_else(|| take_str(&mut params, "strategy"));
        let Some(strategy_type) = strategy else {
            warnings.push(format!("{label}: missing strategy name; declaration ignored"));
            return (None, warnings);
        };

        if engines::lookup(&strategy_type).is_none() {
            let mut msg = format!("{label}: unknown execution strategy '{strategy_type}'");
            if let Some(close) = closest(&strategy_type, engines::names()) {
                msg.push_str(&format!("; did you mean '{close}'?"));
            }
            warnings.push(msg);
        }

        (
            Some(Self {
                strategy_type,
                params,
            }),
            warnings,
        )
    }

    /// `{"type": STRATEGY, ...params}`.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".into(), Value::String(self.strategy_type.clone()));
        for (k, v) in self.params.iter() {
            map.insert(k.to_string(), v.to_json());
        }
        map
    }
}

fn take_str(params: &mut Params, key: &str) -> Option<String> {
    let value = params.get(key)?.to_string();
    let kept: Vec<(String, ParamValue)> = params
        .iter()
        .filter(|(k, _)| *k != key)
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    *params = Params::new();
    for (k, v) in kept {
        params.insert(k, v);
    }
    Some(value)
}

/// The single effective execution declaration of a run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSlot(Option<ExecutionMetadata>);

impl ExecutionSlot {
    /// Store a declaration. Replacing any earlier one returns a warning.
    pub fn set(&mut self, metadata: ExecutionMetadata) -> Option<String> {
        let warning = self.0.as_ref().map(|previous| {
            format!(
                "@execute declared more than once ('{}' then '{}'); the later declaration wins",
                previous.strategy_type, metadata.strategy_type
            )
        });
        self.0 = Some(metadata);
        warning
    }

    pub fn get(&self) -> Option<&ExecutionMetadata> {
        self.0.as_ref()
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.0
            .as_ref()
            .map(ExecutionMetadata::to_json)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::tree::build;
    use serde_json::json;

    fn parse(text: &str) -> (Option<ExecutionMetadata>, Vec<String>) {
        let built = build(&lex(text));
        let d = built.nodes[0].as_directive().unwrap();
        ExecutionMetadata::parse(d, built.unit)
    }

    #[test]
    fn inline_and_body_params() {
        let (meta, warnings) =
            parse("@execute self-consistency samples: 3\n  samples: 5\n  aggregation: majority-vote");
        assert!(warnings.is_empty(), "{warnings:?}");
        let json = Value::Object(meta.unwrap().to_json());
        assert_eq!(
            json,
            json!({"type": "self-consistency", "samples": 5, "aggregation": "majority-vote"})
        );
    }

    #[test]
    fn type_key_names_the_strategy() {
        let (meta, _) = parse("@execute\n  type: reflection\n  max_iterations: 2");
        let meta = meta.unwrap();
        assert_eq!(meta.strategy_type, "reflection");
        assert!(!meta.params.contains_key("type"));
    }

    #[test]
    fn unknown_strategy_suggests() {
        let (meta, warnings) = parse("@execute self-consistancy");
        assert!(meta.is_some());
        assert!(warnings[0].contains("did you mean 'self-consistency'?"));
    }

    #[test]
    fn later_declaration_wins_with_warning() {
        let mut slot = ExecutionSlot::default();
        assert!(slot.set(ExecutionMetadata::new("single-call")).is_none());
        assert!(slot.set(ExecutionMetadata::new("reflection")).is_some());
        assert_eq!(slot.get().unwrap().strategy_type, "reflection");
        assert_eq!(slot.to_json()["type"], "reflection");
    }

    #[test]
    fn repeated_identical_declaration_warns() {
        let mut slot = ExecutionSlot::default();
        assert!(slot.set(ExecutionMetadata::new("single-call")).is_none());
        let warning = slot.set(ExecutionMetadata::new("single-call")).unwrap();
        assert!(warning.contains("more than once"));
        assert_eq!(slot.get().unwrap().strategy_type, "single-call");
    }

    #[test]
    fn empty_slot_is_empty_object() {
        assert!(ExecutionSlot::default().to_json().is_empty());
    }
}
