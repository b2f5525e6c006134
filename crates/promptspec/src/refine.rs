//! `@refine`: specialize a base document.
//!
//! ```text
//! @refine base.md
//!   Tone: formal
//!   Always cite sources.
//! ```
//!
//! The base file is resolved in its own fixpoint with the same bindings,
//! oracle and diagnostics, then merged with the specialization (the
//! directive's body, or the text around it). The specialization wins every
//! conflict. `mingle: false` asks for a structural merge that appends rather
//! than interleaves.

use std::path::PathBuf;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::eval::{Evaluator, PassCtx, RunState, Scope};
use crate::files::{ReadError, resolve_relative};
use crate::lexer::to_wire;
use crate::semantic::Operation;
use crate::semantic::contract;
use crate::tree::Directive;

/// The same `Key: value` setting with different values in both documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub key: String,
    /// Value in the specialization; this one is kept.
    pub target: String,
    /// Value in the base document.
    pub base: String,
    /// The whole base line, which the merge drops.
    pub base_line: String,
}

impl Conflict {
    fn to_json(&self) -> Value {
        json!({
            "key": self.key,
            "target": self.target,
            "base": self.base,
            "base_line": self.base_line,
        })
    }
}

/// `Key: value` settings whose values differ between `target` and `base`.
/// Keys compare case-insensitively.
pub fn conflicts(target: &str, base: &str) -> Vec<Conflict> {
    let base_settings: Vec<(String, String, &str)> = base
        .lines()
        .filter_map(|line| setting(line).map(|(k, v)| (k, v, line.trim())))
        .collect();
    let mut found: Vec<Conflict> = Vec::new();
    for (key, value) in target.lines().filter_map(setting) {
        let Some((_, base_value, base_line)) = base_settings
            .iter()
            .find(|(k, _, _)| k.eq_ignore_ascii_case(&key))
        else {
            continue;
        };
        if base_value.eq_ignore_ascii_case(&value)
            || found.iter().any(|c| c.key.eq_ignore_ascii_case(&key))
        {
            continue;
        }
        found.push(Conflict {
            key,
            target: value,
            base: base_value.clone(),
            base_line: base_line.to_string(),
        });
    }
    found
}

/// A short `Key: value` line: one to four words before the colon and a
/// non-empty value.
fn setting(line: &str) -> Option<(String, String)> {
    let line = line
        .trim()
        .trim_start_matches(['-', '*', '+'])
        .trim_start();
    let (key, value) = line.split_once(':')?;
    let key = key.trim().trim_matches('*').trim();
    let value = value.trim().trim_start_matches('*').trim();
    let words = key.split_whitespace().count();
    let plain = key
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'));
    if value.is_empty() || !(1..=4).contains(&words) || !plain {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

impl Evaluator<'_> {
    /// Merge the base named by `directive` with `target`.
    pub(crate) async fn refine(
        &self,
        directive: &Directive,
        target: &str,
        ctx: &PassCtx,
        state: &mut RunState,
    ) -> CompileResult<String> {
        let label = directive.label();
        let Some(file) = directive.positional.first() else {
            return Err(CompileError::Structural {
                directive: directive.name.clone(),
                line: directive.line,
                message: "missing base document path".to_string(),
            });
        };
        let missing = |path: PathBuf, e: ReadError| CompileError::MissingRefineTarget {
            path,
            line: directive.line,
            reason: e.to_string(),
        };

        let path = resolve_relative(ctx.path.as_deref(), file)
            .map_err(|e| missing(PathBuf::from(file), e))?;
        if state.include_stack.contains(&path) {
            let mut chain = state.include_stack.clone();
            chain.push(path);
            return Err(CompileError::CyclicRefine { chain });
        }
        let source = self.reader.read(&path).map_err(|e| missing(path.clone(), e))?;

        debug!("{label}: resolving base {}", path.display());
        state.include_stack.push(path.clone());
        let resolved = self
            .fixpoint(&source, Scope::included(path.clone()), state)
            .await;
        state.include_stack.pop();
        let base = resolved?.text;

        if target.trim().is_empty() {
            return Ok(base);
        }
        if state.halted.is_some() {
            return Ok(target.to_string());
        }

        let found = conflicts(target, &base);
        for c in &found {
            self.warn(
                ctx,
                state,
                format!(
                    "{label}: '{}' conflicts with {}: keeping '{}' over '{}'",
                    c.key,
                    path.display(),
                    c.target,
                    c.base
                ),
            );
            self.suggest(
                ctx,
                state,
                format!(
                    "{label}: if overriding '{}' is intended, remove it from {}",
                    c.key,
                    path.display()
                ),
            );
        }

        let mingle = directive.params.get_bool("mingle").unwrap_or(true);
        let (op, mode) = if mingle {
            (Operation::EditorialMerge, "editorial")
        } else {
            (Operation::StructuralMerge, "structural")
        };
        let mut params = Map::new();
        params.insert("base".into(), Value::String(to_wire(&base)));
        params.insert("priority".into(), Value::String("target".into()));
        params.insert("mode".into(), Value::String(mode.into()));
        params.insert(
            "conflicts".into(),
            Value::Array(found.iter().map(Conflict::to_json).collect()),
        );

        let merged = self
            .transform_with(directive, op, target, params, ctx, state)
            .await?;

        for line in contract::missing_requirements(target, &merged) {
            self.warn(
                ctx,
                state,
                format!("{label}: requirement may have been lost in the merge: '{line}'"),
            );
            self.suggest(
                ctx,
                state,
                format!("{label}: restate '{line}' after the merge or check the base document"),
            );
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileConfig;
    use crate::diagnostics::DiagnosticKind;
    use crate::events::NoopHandler;
    use crate::files::MemoryReader;
    use crate::semantic::echo::EchoOracle;
    use crate::vars::Bindings;

    async fn run(
        reader: &MemoryReader,
        oracle: &EchoOracle,
        source: &str,
    ) -> (CompileResult<String>, RunState) {
        let config = CompileConfig::default();
        let bindings = Bindings::new();
        let evaluator = Evaluator::new(oracle, reader, &NoopHandler, &config, &bindings);
        let mut state = RunState::default();
        let result = evaluator
            .fixpoint(source, Scope::document(None), &mut state)
            .await
            .map(|r| r.text);
        (result, state)
    }

    #[test]
    fn settings_conflict_on_different_values() {
        let found = conflicts("Tone: formal\nLength: short", "tone: casual\nLength: short\nNote that: x");
        assert_eq!(
            found,
            vec![Conflict {
                key: "Tone".into(),
                target: "formal".into(),
                base: "casual".into(),
                base_line: "tone: casual".into(),
            }]
        );
    }

    #[test]
    fn prose_with_colons_is_not_a_setting() {
        assert!(setting("Remember the following rules when you answer: be kind").is_none());
        assert!(setting("See https://example.com").is_none());
        assert_eq!(
            setting("- **Tone:** formal"),
            Some(("Tone".to_string(), "formal".to_string()))
        );
    }

    #[tokio::test]
    async fn specialization_wins_conflicts() {
        let reader = MemoryReader::new().with_file("base.md", "Tone: casual\nAnswer questions.");
        let oracle = EchoOracle::new();
        let (result, state) = run(&reader, &oracle, "@refine base.md\n  Tone: formal").await;
        let text = result.unwrap();
        assert!(text.starts_with("Tone: formal"));
        assert!(text.contains("Answer questions."));
        assert!(!text.contains("casual"));

        let warnings = state.diagnostics.messages(DiagnosticKind::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'Tone' conflicts"));
        assert_eq!(state.diagnostics.messages(DiagnosticKind::Suggestion).len(), 1);

        let merge = &oracle.requests()[0];
        assert_eq!(merge.operation, Operation::EditorialMerge);
        assert_eq!(merge.parameters["priority"], "target");
    }

    #[tokio::test]
    async fn structural_merge_when_not_mingled() {
        let reader = MemoryReader::new().with_file("base.md", "Base rules.");
        let oracle = EchoOracle::new();
        run(&reader, &oracle, "@refine base.md mingle: false\n  Extra rules.").await;
        assert_eq!(oracle.requests()[0].operation, Operation::StructuralMerge);
    }

    #[tokio::test]
    async fn base_is_resolved_with_its_own_directives() {
        let reader = MemoryReader::new().with_file("base.md", "Kept.\n@note removed");
        let oracle = EchoOracle::new();
        let (result, state) = run(&reader, &oracle, "@refine base.md\n  Added.").await;
        let text = result.unwrap();
        assert!(!text.contains("removed"));
        assert!(state.transitions.iter().any(|t| t.starts_with("[base.md]")));
    }

    #[tokio::test]
    async fn lost_requirement_is_flagged() {
        let reader = MemoryReader::new().with_file("base.md", "Base.");
        let oracle = EchoOracle::new().with_response(Operation::EditorialMerge, "Base.");
        let (_, state) = run(&reader, &oracle, "@refine base.md\n  You must cite sources.").await;
        let warnings = state.diagnostics.messages(DiagnosticKind::Warning);
        assert!(warnings.iter().any(|w| w.contains("must cite sources")));
    }

    #[tokio::test]
    async fn missing_base_is_fatal() {
        let reader = MemoryReader::new();
        let oracle = EchoOracle::new();
        let (result, _) = run(&reader, &oracle, "@refine nowhere.md\n  Text.").await;
        assert!(matches!(result, Err(CompileError::MissingRefineTarget { .. })));
    }

    #[tokio::test]
    async fn cycles_are_detected() {
        let reader = MemoryReader::new()
            .with_file("a.md", "@refine b.md\n  A.")
            .with_file("b.md", "@refine a.md\n  B.");
        let oracle = EchoOracle::new();
        let (result, _) = run(&reader, &oracle, "@refine a.md\n  Top.").await;
        match result {
            Err(CompileError::CyclicRefine { chain }) => {
                assert_eq!(
                    chain,
                    vec![
                        PathBuf::from("a.md"),
                        PathBuf::from("b.md"),
                        PathBuf::from("a.md")
                    ]
                );
            }
            other => panic!("expected CyclicRefine, got {other:?}"),
        }
    }
}
