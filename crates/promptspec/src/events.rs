//! Evaluation events and handlers.
//!
//! The evaluator reports its progress through [`CompileEvent`] variants:
//! pass boundaries, each resolved directive, each oracle round trip and each
//! diagnostic. Callers implement [`EventHandler`] to observe them for logging,
//! progress display, or tests.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Library default, tests |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::diagnostics::Diagnostic;
use crate::semantic::Operation;
use tracing::{debug, info, trace, warn};

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum CompileEvent<'a> {
    /// A fixpoint pass is starting. `scope` is empty for the top-level
    /// document and names the included file for nested refine passes.
    PassStart { pass: u32, max_passes: u32, scope: &'a str },
    /// A pass finished; `changed` is false once the text is stable.
    PassFinished {
        pass: u32,
        scope: &'a str,
        changed: bool,
        resolved: usize,
    },
    /// A directive's handler ran.
    DirectiveResolved {
        name: &'a str,
        line: usize,
        outcome: &'a str,
    },
    /// About to call the oracle.
    SemanticCall {
        operation: Operation,
        directive: &'a str,
        target_len: usize,
    },
    /// The oracle answered.
    SemanticResult {
        operation: Operation,
        result_len: usize,
        satisfied: bool,
    },
    /// A diagnostic was recorded (after de-duplication).
    Diagnostic(&'a Diagnostic),
    /// The text stopped changing.
    FixpointReached { passes: u32 },
    /// An error-severity assertion halted evaluation.
    Halted { reason: &'a str },
}

/// A handler's answer to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventResponse {
    /// Stop the run. Honoured on `PassStart` and `SemanticCall`.
    Abort(String),
}

/// Handler for evaluation events. Most events ignore the return value.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &CompileEvent<'_>) -> Option<EventResponse> {
        let _ = event;
        None
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&CompileEvent<'_>) -> Option<EventResponse> + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&CompileEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&CompileEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    fn on_event(&self, event: &CompileEvent<'_>) -> Option<EventResponse> {
        (self.0)(event)
    }
}

/// Dispatches to several handlers in order; the first response wins.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &CompileEvent<'_>) -> Option<EventResponse> {
        let mut first = None;
        for handler in &self.handlers {
            if let Some(response) = handler.on_event(event) {
                first.get_or_insert(response);
            }
        }
        first
    }
}

/// Logs events via `tracing`: passes at info, directives at debug, oracle
/// payload sizes at trace, diagnostics at warn.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &CompileEvent<'_>) -> Option<EventResponse> {
        match event {
            CompileEvent::PassStart {
                pass,
                max_passes,
                scope,
            } => {
                if scope.is_empty() {
                    info!("[pass {pass}/{max_passes}]");
                } else {
                    info!("[{scope} pass {pass}/{max_passes}]");
                }
            }
            CompileEvent::PassFinished {
                pass,
                changed,
                resolved,
                ..
            } => {
                debug!("pass {pass}: {resolved} directive(s) resolved, changed={changed}");
            }
            CompileEvent::DirectiveResolved {
                name,
                line,
                outcome,
            } => {
                debug!("@{name} (line {line}): {outcome}");
            }
            CompileEvent::SemanticCall {
                operation,
                directive,
                target_len,
            } => {
                trace!("{directive}: {operation} on {target_len} bytes");
            }
            CompileEvent::SemanticResult {
                operation,
                result_len,
                satisfied,
            } => {
                trace!("{operation}: {result_len} bytes back, satisfied={satisfied}");
            }
            CompileEvent::Diagnostic(d) => {
                warn!("{d}");
            }
            CompileEvent::FixpointReached { passes } => {
                info!("fixpoint reached after {passes} pass(es)");
            }
            CompileEvent::Halted { reason } => {
                warn!("evaluation halted: {reason}");
            }
        }
        None
    }
}
