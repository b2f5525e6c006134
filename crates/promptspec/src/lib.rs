//! Composition engine for directive-annotated prompt specs.
//!
//! A prompt spec is markdown with `@directive` lines. Structural directives
//! (`@if`, `@match`, `@note`, `@embed`) shape the text; semantic ones
//! (`@expand`, `@audience`, `@summarize`, `@refine`, ...) ask a
//! [`SemanticOracle`] to rewrite it; metadata directives (`@prompt`, `@tool`,
//! `@execute`) declare named prompts, callable functions and an execution
//! strategy. The engine resolves the document inside-out until the text
//! stops changing and returns a [`CompileOutput`].
//!
//! # Getting started
//!
//! ```ignore
//! use promptspec::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let oracle = LlmOracle::from_env()?;
//!     let compiler = Compiler::new(oracle, FsReader::new("specs"))
//!         .with_event_handler(LoggingHandler);
//!
//!     let bindings = Bindings::new().with("audience", "beginners");
//!     let output = compiler.compile_file("tutor.promptspec.md", &bindings).await
//!         .map_err(|e| e.to_string())?;
//!
//!     println!("{}", output.composed_prompt);
//!     for warning in output.warnings() {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Tests and offline runs use [`EchoOracle`](semantic::echo::EchoOracle),
//! which answers every request deterministically without a network.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`lexer`] | Logical lines, indentation depth, directive headers, `@@` escapes |
//! | [`tree`] | Scope builder: directive nodes with indented bodies |
//! | [`vars`] | [`Bindings`] and `{{name}}` / `@name` substitution |
//! | [`registry`] | Directive table, argument schemas, unknown-name suggestions |
//! | [`directives`] | Control flow, assertions, debug queries, tools, execution metadata |
//! | [`eval`] | Inside-out fixpoint evaluator |
//! | [`refine`] | `@refine` combiner with cycle detection |
//! | [`assemble`] | Named prompts and shared context |
//! | [`semantic`] | Oracle trait, operations, contract checks, echo and LLM oracles |
//! | [`compiler`] | [`Compiler`], the entry point |
//! | [`scan`] | Static metadata scan for forms and pre-flight checks |

pub mod assemble;
pub mod client;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod directives;
pub mod engines;
pub mod error;
pub mod eval;
pub mod events;
pub mod files;
pub mod lexer;
pub mod logging;
pub mod output;
pub mod params;
pub mod prelude;
pub mod refine;
pub mod registry;
pub mod scan;
pub mod semantic;
pub mod tree;
pub mod vars;

use schemars::JsonSchema;

pub use compiler::Compiler;
pub use config::CompileConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{CompileError, CompileResult};
pub use output::CompileOutput;
pub use semantic::SemanticOracle;
pub use vars::Bindings;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default model for the LLM oracle.
pub const DEFAULT_MODEL: &str = "z-ai/glm-5";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use promptspec::{CompileOutput, json_schema_for};
///
/// let schema = json_schema_for::<CompileOutput>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["properties"].get("composed_prompt").is_some());
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
