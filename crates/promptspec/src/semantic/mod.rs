//! Semantic-transform capability.
//!
//! Judgment-based directives (`summarize`, `audience`, `refine`, ...) never
//! rewrite text themselves. They build a [`TransformRequest`] and hand it to
//! a [`SemanticOracle`], then check the returned text against the
//! operation's contract (see [`contract`]).
//!
//! - [`echo::EchoOracle`] is a deterministic stand-in for tests and offline
//!   use.
//! - [`llm::LlmOracle`] calls a chat-completions model through
//!   [`OpenRouterClient`](crate::client::OpenRouterClient).

pub mod contract;
pub mod echo;
pub mod llm;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operations the oracle can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Expand,
    Contract,
    Revise,
    Canon,
    Cohere,
    Audience,
    Style,
    Summarize,
    Compress,
    Extract,
    GenerateExamples,
    OutputFormat,
    StructuralConstraints,
    EditorialMerge,
    StructuralMerge,
    Assert,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Expand => "expand",
            Operation::Contract => "contract",
            Operation::Revise => "revise",
            Operation::Canon => "canon",
            Operation::Cohere => "cohere",
            Operation::Audience => "audience",
            Operation::Style => "style",
            Operation::Summarize => "summarize",
            Operation::Compress => "compress",
            Operation::Extract => "extract",
            Operation::GenerateExamples => "generate-examples",
            Operation::OutputFormat => "output-format",
            Operation::StructuralConstraints => "structural-constraints",
            Operation::EditorialMerge => "editorial-merge",
            Operation::StructuralMerge => "structural-merge",
            Operation::Assert => "assert",
        }
    }

    /// What the operation promises, phrased as an instruction to a model.
    pub fn contract(self) -> &'static str {
        match self {
            Operation::Expand => {
                "Add material that satisfies the instruction. Never remove, weaken, \
                 or reword anything already present."
            }
            Operation::Contract => {
                "Remove or tighten material as instructed. Keep safety language \
                 (must not, never, do not) unless the parameters say safety: allow."
            }
            Operation::Revise => "Apply exactly the requested edit and leave everything else intact.",
            Operation::Canon => "Normalize terminology so each concept uses one consistent term.",
            Operation::Cohere => {
                "Improve ordering and transitions so the text reads as one whole. \
                 Do not add or drop requirements."
            }
            Operation::Audience => "Rewrite for the named audience without changing requirements.",
            Operation::Style => "Rewrite in the requested style without changing requirements.",
            Operation::Summarize => "Summarize the text. The result must be shorter than the input.",
            Operation::Compress => {
                "Shorten the text while keeping every instruction. The result must \
                 be shorter than the input."
            }
            Operation::Extract => "Return only the parts of the text matching the criterion.",
            Operation::GenerateExamples => {
                "Return the text followed by worked examples that follow it."
            }
            Operation::OutputFormat => {
                "Return the text followed by a precise output-format section."
            }
            Operation::StructuralConstraints => {
                "Return the text with the requested structural constraints stated explicitly."
            }
            Operation::EditorialMerge => {
                "Merge the base document into the target text. The target has \
                 priority: every statement in it must survive, and the base yields \
                 wherever the two conflict. You may reorganize freely."
            }
            Operation::StructuralMerge => {
                "Merge the base document into the target text section by section, \
                 keeping the base's structure. The target has priority on conflicts. \
                 Rewrite as little as possible."
            }
            Operation::Assert => {
                "Decide whether the condition holds for the text. Return the text \
                 unchanged if it does; otherwise explain why in could_not_satisfy."
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Request / response ─────────────────────────────────────────────

/// One call to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransformRequest {
    pub operation: Operation,
    pub target_text: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_hint: Option<String>,
}

impl TransformRequest {
    pub fn new(operation: Operation, target_text: impl Into<String>) -> Self {
        Self {
            operation,
            target_text: target_text.into(),
            parameters: Map::new(),
            context_hint: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn with_context_hint(mut self, hint: impl Into<String>) -> Self {
        self.context_hint = Some(hint.into());
        self
    }

    /// The `instruction` parameter, if any.
    pub fn instruction(&self) -> Option<&str> {
        self.parameters
            .get("instruction")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// The oracle's answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransformResponse {
    pub text: String,
    /// Set when the operation could not be carried out as asked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub could_not_satisfy: Option<String>,
}

impl TransformResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            could_not_satisfy: None,
        }
    }

    pub fn unsatisfied(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            could_not_satisfy: Some(reason.into()),
        }
    }
}

// ── Oracle trait ───────────────────────────────────────────────────

/// Boxed future returned by [`SemanticOracle::transform`].
pub type TransformFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransformResponse, String>> + Send + 'a>>;

/// External text-rewriting capability.
///
/// Errors are transport failures (network, auth, unparseable reply) and
/// abort the compilation. An operation the oracle understood but could not
/// perform is reported through [`TransformResponse::could_not_satisfy`].
pub trait SemanticOracle: Send + Sync {
    fn transform<'a>(&'a self, request: &'a TransformRequest) -> TransformFuture<'a>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "oracle"
    }
}

impl<T: SemanticOracle + ?Sized> SemanticOracle for Arc<T> {
    fn transform<'a>(&'a self, request: &'a TransformRequest) -> TransformFuture<'a> {
        (**self).transform(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
