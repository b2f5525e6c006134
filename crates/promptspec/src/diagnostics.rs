//! Run-scoped collector for warnings, errors, and suggestions.
//!
//! Handlers append entries while the evaluator runs; nothing mutates an entry
//! once recorded. For multi-turn use the caller passes the set of messages it
//! already showed the user, and those are never recorded again.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Warning,
    Error,
    Suggestion,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Warning => write!(f, "warning"),
            DiagnosticKind::Error => write!(f, "error"),
            DiagnosticKind::Suggestion => write!(f, "suggestion"),
        }
    }
}

/// A single diagnostic entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            message: message.into(),
        }
    }

    pub fn suggestion(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Suggestion,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Accumulates diagnostics for one compilation, in emission order.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    emitted: HashSet<(DiagnosticKind, String)>,
    previously_seen: HashSet<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collector that suppresses messages the caller already showed.
    pub fn with_seen<I, S>(seen: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            previously_seen: seen.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Record a diagnostic. Returns `false` when it was a duplicate of an
    /// entry from this run or of a previously seen message.
    pub fn push(&mut self, diagnostic: Diagnostic) -> bool {
        if self.previously_seen.contains(&diagnostic.message) {
            return false;
        }
        if !self
            .emitted
            .insert((diagnostic.kind, diagnostic.message.clone()))
        {
            return false;
        }
        self.entries.push(diagnostic);
        true
    }

    pub fn warn(&mut self, message: impl Into<String>) -> bool {
        self.push(Diagnostic::warning(message))
    }

    pub fn error(&mut self, message: impl Into<String>) -> bool {
        self.push(Diagnostic::error(message))
    }

    pub fn suggest(&mut self, message: impl Into<String>) -> bool {
        self.push(Diagnostic::suggestion(message))
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn messages(&self, kind: DiagnosticKind) -> Vec<String> {
        self.entries
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.message.clone())
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.kind == DiagnosticKind::Error)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_within_a_run_are_dropped() {
        let mut diags = Diagnostics::new();
        assert!(diags.warn("variable `x` is not bound"));
        assert!(!diags.warn("variable `x` is not bound"));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn same_message_different_kind_is_kept() {
        let mut diags = Diagnostics::new();
        diags.warn("check the base document");
        diags.suggest("check the base document");
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn previously_seen_messages_are_suppressed() {
        let mut diags = Diagnostics::with_seen(["old warning"]);
        assert!(!diags.warn("old warning"));
        assert!(diags.warn("new warning"));
        assert_eq!(diags.messages(DiagnosticKind::Warning), vec!["new warning"]);
    }

    #[test]
    fn has_errors_tracks_error_entries() {
        let mut diags = Diagnostics::new();
        diags.warn("w");
        assert!(!diags.has_errors());
        diags.error("e");
        assert!(diags.has_errors());
    }
}
