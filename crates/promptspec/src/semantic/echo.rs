//! Deterministic oracle for tests and `--offline` runs.
//!
//! [`EchoOracle`] never calls a model. Each operation gets a predictable,
//! contract-respecting answer (rewrites return the target unchanged,
//! additive operations append their instruction, merges keep the target and
//! append the base's non-conflicting lines). Individual operations can be
//! scripted with [`EchoOracle::with_response`], and every request is
//! recorded for inspection.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::Value;
use tracing::trace;

use super::{Operation, SemanticOracle, TransformFuture, TransformRequest, TransformResponse};

#[derive(Debug, Default)]
pub struct EchoOracle {
    scripted: HashMap<Operation, TransformResponse>,
    requests: Mutex<Vec<TransformRequest>>,
}

impl EchoOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `op` with `text`.
    pub fn with_response(mut self, op: Operation, text: impl Into<String>) -> Self {
        self.scripted.insert(op, TransformResponse::text(text));
        self
    }

    /// Always answer `op` with `could_not_satisfy: reason`, echoing the target.
    pub fn with_unsatisfied(mut self, op: Operation, reason: impl Into<String>) -> Self {
        self.scripted
            .insert(op, TransformResponse::unsatisfied(String::new(), reason));
        self
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<TransformRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn respond(&self, request: &TransformRequest) -> TransformResponse {
        if let Some(scripted) = self.scripted.get(&request.operation) {
            let mut response = scripted.clone();
            if response.could_not_satisfy.is_some() && response.text.is_empty() {
                response.text = request.target_text.clone();
            }
            return response;
        }

        let target = request.target_text.as_str();
        match request.operation {
            Operation::Expand
            | Operation::GenerateExamples
            | Operation::OutputFormat
            | Operation::StructuralConstraints => {
                TransformResponse::text(append(target, request.instruction().unwrap_or("")))
            }
            Operation::EditorialMerge | Operation::StructuralMerge => {
                let base = request
                    .parameters
                    .get("base")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                TransformResponse::text(merge(target, base, &conflicting_lines(request)))
            }
            Operation::Extract => {
                TransformResponse::text(extract(target, request.instruction().unwrap_or("")))
            }
            Operation::Summarize => {
                let max_words = request
                    .parameters
                    .get("max_words")
                    .and_then(Value::as_u64)
                    .and_then(|n| usize::try_from(n).ok());
                TransformResponse::text(truncate_words(target, max_words))
            }
            Operation::Assert => TransformResponse::unsatisfied(
                target,
                "semantic conditions cannot be checked offline",
            ),
            _ => TransformResponse::text(target),
        }
    }
}

impl SemanticOracle for EchoOracle {
    fn transform<'a>(&'a self, request: &'a TransformRequest) -> TransformFuture<'a> {
        Box::pin(async move {
            trace!("echo oracle: {} ({} bytes)", request.operation, request.target_text.len());
            if let Ok(mut log) = self.requests.lock() {
                log.push(request.clone());
            }
            Ok(self.respond(request))
        })
    }

    fn name(&self) -> &str {
        "echo"
    }
}

// ── Deterministic transforms ───────────────────────────────────────

fn append(target: &str, addition: &str) -> String {
    match (target.trim().is_empty(), addition.trim().is_empty()) {
        (_, true) => target.to_string(),
        (true, false) => addition.trim().to_string(),
        (false, false) => format!("{}\n{}", target.trim_end(), addition.trim()),
    }
}

fn conflicting_lines(request: &TransformRequest) -> HashSet<String> {
    request
        .parameters
        .get("conflicts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.get("base_line").and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Target first, then base lines it does not already contain.
fn merge(target: &str, base: &str, conflicts: &HashSet<String>) -> String {
    let present: HashSet<&str> = target.lines().map(str::trim).collect();
    let extra: Vec<&str> = base
        .lines()
        .filter(|l| {
            let t = l.trim();
            t.is_empty() || !(present.contains(t) || conflicts.contains(t))
        })
        .collect();
    let extra = extra.join("\n");
    let extra = extra.trim_matches('\n');

    match (target.trim().is_empty(), extra.trim().is_empty()) {
        (_, true) => target.to_string(),
        (true, false) => extra.to_string(),
        (false, false) => format!("{}\n\n{extra}", target.trim_end()),
    }
}

fn extract(target: &str, criterion: &str) -> String {
    let keys: Vec<String> = criterion
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() >= 3)
        .collect();
    if keys.is_empty() {
        return target.to_string();
    }
    target
        .lines()
        .filter(|l| {
            let lower = l.to_lowercase();
            keys.iter().any(|k| lower.contains(k.as_str()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_words(target: &str, max_words: Option<usize>) -> String {
    match max_words {
        Some(n) if target.split_whitespace().count() > n => {
            target.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
        }
        _ => target.to_string(),
    }
}
