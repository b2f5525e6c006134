//! Convenience re-exports for common `promptspec` types.
//!
//! ```ignore
//! use promptspec::prelude::*;
//! ```
//!
//! Covers compiling a document end to end: the [`Compiler`], its config,
//! oracles, file readers, bindings and event handlers. Lower-level pieces
//! (lexer, tree, registry) are imported from their modules directly.

// ── Compilation ─────────────────────────────────────────────────────
pub use crate::compiler::Compiler;
pub use crate::config::{CompileConfig, OutputFormat};
pub use crate::error::{CompileError, CompileResult};
pub use crate::output::{CompileOutput, DiagnosticsReport, SemanticCallRecord};
pub use crate::vars::Bindings;
pub use crate::{DEFAULT_MODEL, json_schema_for};

// ── Diagnostics and events ──────────────────────────────────────────
pub use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use crate::events::{
    CompileEvent, CompositeEventHandler, EventHandler, EventResponse, FnEventHandler,
    LoggingHandler, NoopHandler,
};

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::client::{OpenRouterClient, RetryConfig};
pub use crate::files::{FileReader, FsReader, MemoryReader, ReadError};
pub use crate::semantic::echo::EchoOracle;
pub use crate::semantic::llm::LlmOracle;
pub use crate::semantic::{
    Operation, SemanticOracle, TransformFuture, TransformRequest, TransformResponse,
};

// ── Output pieces ───────────────────────────────────────────────────
pub use crate::directives::tools::ToolDef;
pub use crate::scan::{SpecMetadata, scan};
