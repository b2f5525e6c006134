//! Fatal compilation errors.
//!
//! Recoverable problems (unbound condition variables, repeated argument keys,
//! most contract violations) never become a [`CompileError`]; they are
//! recorded in the [`Diagnostics`](crate::diagnostics::Diagnostics) collector
//! and compilation continues. A `CompileError` stops the run, but the
//! [`Compiler`](crate::compiler::Compiler) still returns the partial text and
//! every diagnostic gathered up to that point.

use std::path::PathBuf;

use thiserror::Error;

use crate::files::ReadError;

/// Errors that abort a compilation run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    /// Malformed scope that the builder could not recover from.
    #[error("@{directive} (line {line}): {message}")]
    Structural {
        directive: String,
        line: usize,
        message: String,
    },

    /// A `@refine` chain includes a document that is already being resolved.
    #[error("cyclic @refine inclusion: {}", format_chain(.chain))]
    CyclicRefine { chain: Vec<PathBuf> },

    /// A `@refine` target could not be read.
    #[error("@refine (line {line}): cannot specialize missing document '{}': {reason}", .path.display())]
    MissingRefineTarget {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A semantic directive's result broke a contract that is fatal for it.
    #[error("@{directive} (line {line}): contract violated: {message}")]
    ContractViolation {
        directive: String,
        line: usize,
        message: String,
    },

    /// The evaluator hit its pass cap without the text stabilizing.
    #[error(
        "no fixpoint after {passes} passes; last unstable directive: {last_unstable}"
    )]
    FixpointExceeded { passes: u32, last_unstable: String },

    /// The semantic-transform capability failed outright.
    #[error("semantic transform failed for @{directive} (line {line}): {message}")]
    Oracle {
        directive: String,
        line: usize,
        message: String,
    },

    /// An event handler asked the run to stop.
    #[error("compilation cancelled: {0}")]
    Cancelled(String),

    /// A file needed by the run could not be read.
    #[error(transparent)]
    Read(#[from] ReadError),
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type CompileResult<T> = Result<T, CompileError>;
