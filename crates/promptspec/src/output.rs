//! The result of a compilation, as returned to library callers and printed
//! by the CLI.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::directives::tools::ToolDef;
use crate::semantic::Operation;

/// Diagnostics grouped by kind, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DiagnosticsReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub suggestions: Vec<String>,
}

impl From<&Diagnostics> for DiagnosticsReport {
    fn from(diagnostics: &Diagnostics) -> Self {
        Self {
            warnings: diagnostics.messages(DiagnosticKind::Warning),
            errors: diagnostics.messages(DiagnosticKind::Error),
            suggestions: diagnostics.messages(DiagnosticKind::Suggestion),
        }
    }
}

/// One round trip to the semantic oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SemanticCallRecord {
    pub operation: Operation,
    /// Directive label, e.g. `@summarize (line 4)`.
    pub directive: String,
    pub target_chars: usize,
    pub result_chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub could_not_satisfy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompileOutput {
    /// Full resolved text, or the shared context when named prompts exist.
    pub composed_prompt: String,
    pub prompts: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prompt_roles: BTreeMap<String, String>,
    pub tools: Vec<ToolDef>,
    /// `{"type": STRATEGY, ...params}`, or empty.
    pub execution: Map<String, Value>,
    pub diagnostics: DiagnosticsReport,
    /// One entry per fixpoint pass.
    pub transitions: Vec<String>,
    /// Notes from debug queries.
    pub analysis: Vec<String>,
    pub semantic_calls: Vec<SemanticCallRecord>,
}

impl CompileOutput {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.errors.is_empty()
    }

    pub fn warnings(&self) -> &[String] {
        &self.diagnostics.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.diagnostics.errors
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Composed text, each named prompt, then tools and execution as JSON
    /// blocks. Diagnostics are not included.
    pub fn to_markdown(&self) -> String {
        let mut out = self.composed_prompt.trim_end().to_string();

        let named: Vec<(&String, &String)> = self
            .prompts
            .iter()
            .filter(|(name, _)| !(self.prompts.len() == 1 && name.as_str() == "default"))
            .collect();
        for (name, body) in named {
            let _ = write!(out, "\n\n---\n\n## Prompt: {name}");
            if let Some(role) = self.prompt_roles.get(name) {
                let _ = write!(out, " ({role})");
            }
            let _ = write!(out, "\n\n{}", body.trim_end());
        }

        if !self.tools.is_empty() {
            let tools = serde_json::to_string_pretty(&self.tools).unwrap_or_default();
            let _ = write!(out, "\n\n---\n\n## Tools\n\n```json\n{tools}\n```");
        }
        if !self.execution.is_empty() {
            let execution = serde_json::to_string_pretty(&self.execution).unwrap_or_default();
            let _ = write!(out, "\n\n---\n\n## Execution\n\n```json\n{execution}\n```");
        }
        out.push('\n');
        out
    }
}
