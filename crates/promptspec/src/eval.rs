//! Inside-out fixpoint evaluator.
//!
//! One pass substitutes variables, re-lexes the text, and resolves the
//! resulting tree in two phases per scope:
//!
//! 1. **Local**, in document order. Control flow (`@if`, `@match`) selects a
//!    branch and splices it in place before anything inside it runs, so an
//!    unselected branch is never evaluated. Every other directive has its
//!    body resolved first, then its handler runs on the plain-text result.
//! 2. **Scope-wide**, for directives whose target is the surrounding text
//!    rather than their own body (instruction rewrites, bodyless lossy
//!    directives, `@refine`, `@assert`, `@structure?`). Each targets the run
//!    of text it sits in; named prompts split a scope into runs.
//!
//! Passes repeat until the rendered text stops changing, because handler
//! output may introduce new directives or references. The pass count is
//! capped by [`CompileConfig::max_passes`].

use std::collections::VecDeque;
use std::future::Future;
use std::mem;
use std::path::PathBuf;
use std::pin::Pin;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::CompileConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::directives::execution::{ExecutionMetadata, ExecutionSlot};
use crate::directives::tools::{ToolDeclaration, ToolRegistry};
use crate::directives::{self, Inventory, QueryReport, Verdict};
use crate::error::{CompileError, CompileResult};
use crate::events::{CompileEvent, EventHandler, EventResponse};
use crate::files::{FileReader, resolve_relative};
use crate::lexer::{from_wire, lex_with_unit, protect_all, protect_escapes, to_wire, unescape};
use crate::output::SemanticCallRecord;
use crate::registry::{self, Handler, Query, TargetMode, closest};
use crate::semantic::contract::{self, ContractOptions, Severity};
use crate::semantic::{Operation, SemanticOracle, TransformRequest, TransformResponse};
use crate::tree::{Directive, DocumentNode, build, render, text_nodes};
use crate::vars::{Bindings, substitute};

/// Boxed future for the recursive evaluation steps.
pub type EvalFuture<'a, T> = Pin<Box<dyn Future<Output = CompileResult<T>> + Send + 'a>>;

// ── Run state ──────────────────────────────────────────────────────

/// Everything a compilation accumulates besides the text itself. Shared by
/// the top-level document and every document it includes.
#[derive(Debug, Default)]
pub struct RunState {
    pub diagnostics: Diagnostics,
    pub tools: ToolRegistry,
    pub execution: ExecutionSlot,
    pub transitions: Vec<String>,
    pub analysis: Vec<String>,
    pub semantic_calls: Vec<SemanticCallRecord>,
    /// Set by a failed `severity: error` assertion.
    pub halted: Option<String>,
    /// Latest text of the top-level document, kept for failed runs.
    pub partial: String,
    pub(crate) include_stack: Vec<PathBuf>,
}

impl RunState {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            diagnostics,
            ..Self::default()
        }
    }

    /// Record a diagnostic and announce it unless it is a duplicate.
    pub fn report(&mut self, handler: &dyn EventHandler, diagnostic: Diagnostic) {
        if self.diagnostics.push(diagnostic.clone()) {
            handler.on_event(&CompileEvent::Diagnostic(&diagnostic));
        }
    }
}

/// The document a fixpoint runs over.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Path of the document, used to resolve relative includes.
    pub path: Option<PathBuf>,
    /// Empty for the top-level document.
    pub label: String,
}

impl Scope {
    pub fn document(path: Option<PathBuf>) -> Self {
        Self {
            path,
            label: String::new(),
        }
    }

    pub fn included(path: PathBuf) -> Self {
        Self {
            label: path.display().to_string(),
            path: Some(path),
        }
    }
}

/// Result of a fixpoint run. `text` still carries escaped at-signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub text: String,
    pub unit: usize,
    pub passes: u32,
}

/// Per-document evaluation context.
pub(crate) struct PassCtx {
    pub(crate) path: Option<PathBuf>,
    pub(crate) label: String,
    inventory: Inventory,
    pub(crate) unit: usize,
    /// Labels of directives resolved in the current pass.
    resolved: Vec<String>,
}

impl PassCtx {
    pub(crate) fn scoped(&self, message: impl Into<String>) -> String {
        let message = message.into();
        if self.label.is_empty() {
            message
        } else {
            format!("[{}] {message}", self.label)
        }
    }
}

// ── Evaluator ──────────────────────────────────────────────────────

pub struct Evaluator<'a> {
    pub(crate) oracle: &'a dyn SemanticOracle,
    pub(crate) reader: &'a dyn FileReader,
    pub(crate) handler: &'a dyn EventHandler,
    pub(crate) config: &'a CompileConfig,
    pub(crate) bindings: &'a Bindings,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        oracle: &'a dyn SemanticOracle,
        reader: &'a dyn FileReader,
        handler: &'a dyn EventHandler,
        config: &'a CompileConfig,
        bindings: &'a Bindings,
    ) -> Self {
        Self {
            oracle,
            reader,
            handler,
            config,
            bindings,
        }
    }

    /// Resolve `source` until its text stops changing.
    pub fn fixpoint<'b>(
        &'b self,
        source: &'b str,
        scope: Scope,
        state: &'b mut RunState,
    ) -> EvalFuture<'b, Resolved> {
        Box::pin(async move {
            let max_passes = self.config.max_passes;
            let mut ctx = PassCtx {
                path: scope.path,
                label: scope.label,
                inventory: Inventory::from_source(source),
                unit: 0,
                resolved: Vec::new(),
            };
            let mut text = protect_escapes(source);
            let mut unit: Option<usize> = None;

            for pass in 1..=max_passes {
                if let Some(EventResponse::Abort(reason)) =
                    self.handler.on_event(&CompileEvent::PassStart {
                        pass,
                        max_passes,
                        scope: &ctx.label,
                    })
                {
                    state.partial = text;
                    return Err(CompileError::Cancelled(reason));
                }

                let substituted = substitute(&text, self.bindings, registry::is_reserved);
                let substituted_any = substituted.text != text;
                let built = build(&lex_with_unit(&substituted.text, unit));
                unit = Some(built.unit);
                ctx.unit = built.unit;
                ctx.resolved.clear();
                if pass == 1 {
                    for warning in &built.warnings {
                        let message = ctx.scoped(warning.as_str());
                        state.report(self.handler, Diagnostic::warning(message));
                    }
                }

                let nodes = match self.resolve_list(built.nodes, &mut ctx, state).await {
                    Ok(nodes) => nodes,
                    Err(e) => {
                        state.partial = text;
                        return Err(e);
                    }
                };
                let rendered = render(&nodes, ctx.unit);
                let changed = rendered != text;
                self.handler.on_event(&CompileEvent::PassFinished {
                    pass,
                    scope: &ctx.label,
                    changed,
                    resolved: ctx.resolved.len(),
                });
                text = rendered;
                if ctx.label.is_empty() {
                    state.partial.clone_from(&text);
                }

                if let Some(reason) = state.halted.clone() {
                    state
                        .transitions
                        .push(ctx.scoped(format!("pass {pass}: halted: {reason}")));
                    return Ok(Resolved {
                        text,
                        unit: ctx.unit,
                        passes: pass,
                    });
                }

                if !changed {
                    let why = if pass == 1 {
                        "nothing to resolve"
                    } else {
                        "fixpoint reached"
                    };
                    state
                        .transitions
                        .push(ctx.scoped(format!("pass {pass}: no change; {why}")));
                    self.handler
                        .on_event(&CompileEvent::FixpointReached { passes: pass });
                    return Ok(Resolved {
                        text,
                        unit: ctx.unit,
                        passes: pass,
                    });
                }

                state
                    .transitions
                    .push(ctx.scoped(transition_entry(pass, &ctx.resolved, substituted_any)));
            }

            if ctx.label.is_empty() {
                state.partial.clone_from(&text);
            }
            Err(CompileError::FixpointExceeded {
                passes: max_passes,
                last_unstable: ctx
                    .resolved
                    .last()
                    .cloned()
                    .unwrap_or_else(|| "variable substitution".to_string()),
            })
        })
    }

    /// Resolve one scope's node list: the local phase, then the scope-wide
    /// phase.
    fn resolve_list<'b>(
        &'b self,
        nodes: Vec<DocumentNode>,
        ctx: &'b mut PassCtx,
        state: &'b mut RunState,
    ) -> EvalFuture<'b, Vec<DocumentNode>> {
        Box::pin(async move {
            let unit = ctx.unit;
            let mut queue: VecDeque<DocumentNode> = nodes.into();
            let mut out: Vec<DocumentNode> = Vec::with_capacity(queue.len());

            while let Some(node) = queue.pop_front() {
                let mut d = match node {
                    DocumentNode::Directive(d) if state.halted.is_none() => d,
                    other => {
                        out.push(other);
                        continue;
                    }
                };
                let Some(spec) = d.spec() else {
                    self.keep_unknown(d, ctx, state, &mut out);
                    continue;
                };

                match spec.handler {
                    Handler::If => {
                        let condition = directives::evaluate_if(&d, self.bindings);
                        if let Some(w) = condition.warning {
                            self.warn(ctx, state, w);
                        }
                        let otherwise = take_else(&mut queue, d.indent);
                        let branch = match (condition.holds, otherwise) {
                            (true, _) => mem::take(&mut d.body),
                            (false, Some(e)) => e.body,
                            (false, None) => Vec::new(),
                        };
                        let outcome = if condition.holds { "then" } else { "else" };
                        self.done(ctx, &d, outcome);
                        splice_front(&mut queue, reindent(branch, d.indent, unit));
                    }
                    Handler::Else => {
                        self.warn(
                            ctx,
                            state,
                            format!("{}: @else without a preceding @if; removed", d.label()),
                        );
                        self.done(ctx, &d, "orphan removed");
                    }
                    Handler::Match => {
                        let (branch, warnings) =
                            directives::evaluate_match(&d, self.bindings, unit);
                        for w in warnings {
                            self.warn(ctx, state, w);
                        }
                        let outcome = if branch.is_some() { "case selected" } else { "dropped" };
                        self.done(ctx, &d, outcome);
                        splice_front(
                            &mut queue,
                            reindent(branch.unwrap_or_default(), d.indent, unit),
                        );
                    }
                    Handler::Note => {
                        self.resolve_list(mem::take(&mut d.body), ctx, state).await?;
                        self.done(ctx, &d, "removed");
                    }
                    Handler::Prompt => {
                        d.body = self.resolve_list(mem::take(&mut d.body), ctx, state).await?;
                        self.done(ctx, &d, "named prompt");
                        out.push(DocumentNode::Directive(d));
                    }
                    Handler::Tool => {
                        d.body = self.resolve_list(mem::take(&mut d.body), ctx, state).await?;
                        let (tool, warnings) = ToolDeclaration::parse(&d, unit);
                        for w in warnings {
                            self.warn(ctx, state, w);
                        }
                        if let Some(tool) = tool
                            && let Some(w) = state.tools.register(tool)
                        {
                            self.warn(ctx, state, format!("{}: {w}", d.label()));
                        }
                        self.done(ctx, &d, "registered");
                    }
                    Handler::Execute => {
                        d.body = self.resolve_list(mem::take(&mut d.body), ctx, state).await?;
                        let (metadata, warnings) = ExecutionMetadata::parse(&d, unit);
                        for w in warnings {
                            self.warn(ctx, state, w);
                        }
                        if let Some(metadata) = metadata
                            && let Some(w) = state.execution.set(metadata)
                        {
                            self.warn(ctx, state, format!("{}: {w}", d.label()));
                        }
                        self.done(ctx, &d, "registered");
                    }
                    Handler::Embed => {
                        let nodes = self.embed(&d, ctx, state);
                        out.extend(reindent(nodes, d.indent, unit));
                        self.done(ctx, &d, "inserted");
                    }
                    Handler::Query(Query::Directives) => {
                        let report = directives::directives_report(&d, &ctx.inventory);
                        self.record_query(ctx, state, report);
                        self.done(ctx, &d, "reported");
                    }
                    Handler::Query(Query::Vars) => {
                        let report = directives::vars_report(&d, &ctx.inventory, self.bindings);
                        self.record_query(ctx, state, report);
                        self.done(ctx, &d, "reported");
                    }
                    Handler::Refine if d.has_body() => {
                        d.body = self.resolve_list(mem::take(&mut d.body), ctx, state).await?;
                        let target = d.body_text(unit);
                        let merged = self.refine(&d, &target, ctx, state).await?;
                        out.extend(reindent(text_nodes(&merged), d.indent, unit));
                        self.done(ctx, &d, "merged");
                    }
                    Handler::Transform(op, mode) if is_local(&d, mode) => {
                        d.body = self.resolve_list(mem::take(&mut d.body), ctx, state).await?;
                        if let Some(text) = self.transform_local(&d, op, mode, ctx, state).await? {
                            out.extend(reindent(text_nodes(&text), d.indent, unit));
                        }
                        self.done(ctx, &d, "transformed");
                    }
                    Handler::Query(Query::Structure)
                    | Handler::Assert
                    | Handler::Refine
                    | Handler::Transform(..) => {
                        // Scope-wide: body first, handler in the second phase.
                        d.body = self.resolve_list(mem::take(&mut d.body), ctx, state).await?;
                        out.push(DocumentNode::Directive(d));
                    }
                }
            }

            self.resolve_scope(out, ctx, state).await
        })
    }

    /// Second phase: run scope-wide directives in document order.
    async fn resolve_scope(
        &self,
        nodes: Vec<DocumentNode>,
        ctx: &mut PassCtx,
        state: &mut RunState,
    ) -> CompileResult<Vec<DocumentNode>> {
        if state.halted.is_some() || !nodes.iter().any(is_scope_wide) {
            return Ok(nodes);
        }
        let unit = ctx.unit;

        let mut segments: Vec<Segment> = Vec::new();
        let mut pending: Vec<(usize, Directive)> = Vec::new();
        for node in nodes {
            match node {
                DocumentNode::Directive(d) if is_scope_wide_directive(&d) => {
                    if !matches!(segments.last(), Some(Segment::Run(_))) {
                        segments.push(Segment::Run(Vec::new()));
                    }
                    pending.push((segments.len() - 1, d));
                }
                DocumentNode::Text(t) => match segments.last_mut() {
                    Some(Segment::Run(run)) => run.push(DocumentNode::Text(t)),
                    _ => segments.push(Segment::Run(vec![DocumentNode::Text(t)])),
                },
                barrier => segments.push(Segment::Barrier(barrier)),
            }
        }

        let mut leftover: Vec<(usize, Directive)> = Vec::new();
        for (run, d) in pending {
            if state.halted.is_some() {
                leftover.push((run, d));
                continue;
            }
            let Some(handler) = d.spec().map(|s| s.handler) else {
                continue;
            };
            match handler {
                Handler::Assert => {
                    let whole = render_segments(&segments, unit);
                    self.assert(&d, &whole, ctx, state).await?;
                    self.done(ctx, &d, "checked");
                }
                Handler::Query(Query::Structure) => {
                    let whole = unescape(&render_segments(&segments, unit));
                    let report = directives::structure_report(&d, &whole);
                    self.record_query(ctx, state, report);
                    self.done(ctx, &d, "reported");
                }
                Handler::Refine => {
                    let target = run_core(&segments, run, unit);
                    let merged = self.refine(&d, &target, ctx, state).await?;
                    replace_run_core(&mut segments, run, &merged);
                    self.done(ctx, &d, "merged");
                }
                Handler::Transform(op, _) => {
                    let target = run_core(&segments, run, unit);
                    if target.trim().is_empty() && !is_additive(op) {
                        self.warn(
                            ctx,
                            state,
                            format!("{}: no surrounding text to operate on; removed", d.label()),
                        );
                    } else {
                        let instruction = instruction_text(&d, unit);
                        let text = self.transform_text(&d, op, &target, &instruction, ctx, state).await?;
                        replace_run_core(&mut segments, run, &text);
                    }
                    self.done(ctx, &d, "transformed");
                }
                _ => {}
            }
        }

        // Unreached after a halt: keep them verbatim after their run.
        for (run, d) in leftover.into_iter().rev() {
            segments.insert(run + 1, Segment::Barrier(DocumentNode::Directive(d)));
        }

        Ok(segments
            .into_iter()
            .flat_map(|s| match s {
                Segment::Run(nodes) => nodes,
                Segment::Barrier(node) => vec![node],
            })
            .collect())
    }

    // ── Handlers ───────────────────────────────────────────────────

    fn keep_unknown(
        &self,
        d: Directive,
        ctx: &mut PassCtx,
        state: &mut RunState,
        out: &mut Vec<DocumentNode>,
    ) {
        let label = d.label();
        self.warn(
            ctx,
            state,
            format!("unknown directive {label}; kept as literal text"),
        );
        if let Some(close) = closest(&d.name, registry::names()) {
            self.suggest(ctx, state, format!("{label}: did you mean @{close}?"));
        }
        self.done(ctx, &d, "kept verbatim");
        let rendered = render(&[DocumentNode::Directive(d)], ctx.unit);
        out.extend(text_nodes(&protect_all(&rendered)));
    }

    fn embed(&self, d: &Directive, ctx: &PassCtx, state: &mut RunState) -> Vec<DocumentNode> {
        let Some(file) = d
            .params
            .get_str("file")
            .map(str::to_string)
            .or_else(|| d.positional.first().cloned())
        else {
            self.warn(ctx, state, format!("{}: missing file; removed", d.label()));
            return Vec::new();
        };
        match resolve_relative(ctx.path.as_deref(), &file).and_then(|p| self.reader.read(&p)) {
            Ok(content) => text_nodes(&protect_all(&content)),
            Err(e) => {
                self.warn(
                    ctx,
                    state,
                    format!("{}: cannot embed '{file}': {e}; removed", d.label()),
                );
                Vec::new()
            }
        }
    }

    fn record_query(&self, ctx: &PassCtx, state: &mut RunState, report: QueryReport) {
        state.analysis.push(ctx.scoped(report.note));
        self.suggest(ctx, state, report.suggestion);
    }

    async fn assert(
        &self,
        d: &Directive,
        text: &str,
        ctx: &PassCtx,
        state: &mut RunState,
    ) -> CompileResult<()> {
        let condition = instruction_text(d, ctx.unit);
        if condition.is_empty() {
            self.warn(ctx, state, format!("{}: empty condition; ignored", d.label()));
            return Ok(());
        }

        let verdict = match directives::check_assertion(&condition, &unescape(text), self.bindings) {
            Verdict::Undecided => {
                let mut params = Map::new();
                params.insert("instruction".into(), Value::String(condition.clone()));
                let response = self.call_oracle(d, Operation::Assert, text, params, state).await?;
                match response.could_not_satisfy {
                    Some(reason) => Verdict::Fails(reason),
                    None => Verdict::Holds,
                }
            }
            decided => decided,
        };

        if let Verdict::Fails(reason) = verdict {
            let message = format!("{} failed: {condition} ({reason})", d.label());
            if d.params.get_str("severity") == Some("error") {
                self.error(ctx, state, message.clone());
                self.handler
                    .on_event(&CompileEvent::Halted { reason: &message });
                state.halted = Some(message);
            } else {
                self.warn(ctx, state, message);
            }
        }
        Ok(())
    }

    /// File- or body-targeted lossy directives. `None` when the file is
    /// unreadable (the directive is dropped with a warning).
    async fn transform_local(
        &self,
        d: &Directive,
        op: Operation,
        mode: TargetMode,
        ctx: &PassCtx,
        state: &mut RunState,
    ) -> CompileResult<Option<String>> {
        let unit = ctx.unit;
        let (target, instruction) = if mode == TargetMode::Body && d.has_body() {
            (d.body_text(unit), d.free_text())
        } else {
            let file = d.params.get_str("file").unwrap_or_default();
            let read = resolve_relative(ctx.path.as_deref(), file).and_then(|p| self.reader.read(&p));
            match read {
                Ok(content) => (protect_escapes(&content), instruction_text(d, unit)),
                Err(e) => {
                    self.warn(
                        ctx,
                        state,
                        format!("{}: cannot read '{file}': {e}; removed", d.label()),
                    );
                    return Ok(None);
                }
            }
        };
        self.transform_text(d, op, &target, &instruction, ctx, state)
            .await
            .map(Some)
    }

    /// Call the oracle for `op` on `target` and check its contract. A
    /// violation of error severity keeps the original text.
    pub(crate) async fn transform_text(
        &self,
        d: &Directive,
        op: Operation,
        target: &str,
        instruction: &str,
        ctx: &PassCtx,
        state: &mut RunState,
    ) -> CompileResult<String> {
        let mut params = d.params.to_json_map();
        params.remove("file");
        if !instruction.trim().is_empty() {
            params.insert("instruction".into(), Value::String(instruction.trim().to_string()));
        }
        self.transform_with(d, op, target, params, ctx, state).await
    }

    pub(crate) async fn transform_with(
        &self,
        d: &Directive,
        op: Operation,
        target: &str,
        params: Map<String, Value>,
        ctx: &PassCtx,
        state: &mut RunState,
    ) -> CompileResult<String> {
        let response = self.call_oracle(d, op, target, params, state).await?;
        let mut text = response.text;

        if let Some(reason) = response.could_not_satisfy {
            let message = format!("{} could not be satisfied: {reason}", d.label());
            if op == Operation::Expand {
                self.error(ctx, state, message);
            } else {
                self.warn(ctx, state, message);
            }
            if text.trim().is_empty() {
                text = target.to_string();
            }
        }

        let opts = ContractOptions {
            strict: self.config.strict_contracts,
            safety_allow: d.params.get_str("safety") == Some("allow"),
        };
        if let Some(violation) = contract::check(op, target, &text, opts) {
            let message = CompileError::ContractViolation {
                directive: d.name.clone(),
                line: d.line,
                message: violation.message,
            }
            .to_string();
            match violation.severity {
                Severity::Error => {
                    self.error(ctx, state, format!("{message}; original text kept"));
                    return Ok(target.to_string());
                }
                Severity::Warning => self.warn(ctx, state, message),
            }
        }
        Ok(text)
    }

    /// One oracle round trip. Escapes travel as `@@`.
    pub(crate) async fn call_oracle(
        &self,
        d: &Directive,
        op: Operation,
        target: &str,
        params: Map<String, Value>,
        state: &mut RunState,
    ) -> CompileResult<TransformResponse> {
        let label = d.label();
        if let Some(EventResponse::Abort(reason)) = self.handler.on_event(&CompileEvent::SemanticCall {
            operation: op,
            directive: &label,
            target_len: target.len(),
        }) {
            return Err(CompileError::Cancelled(reason));
        }

        let request = TransformRequest::new(op, to_wire(target))
            .with_parameters(params)
            .with_context_hint(label.clone());
        let response = self
            .oracle
            .transform(&request)
            .await
            .map_err(|message| CompileError::Oracle {
                directive: d.name.clone(),
                line: d.line,
                message,
            })?;

        let text = from_wire(&response.text);
        self.handler.on_event(&CompileEvent::SemanticResult {
            operation: op,
            result_len: text.len(),
            satisfied: response.could_not_satisfy.is_none(),
        });
        debug!("{label}: {op} via {}", self.oracle.name());
        state.semantic_calls.push(SemanticCallRecord {
            operation: op,
            directive: label,
            target_chars: target.chars().count(),
            result_chars: text.chars().count(),
            could_not_satisfy: response.could_not_satisfy.clone(),
        });
        Ok(TransformResponse {
            text,
            could_not_satisfy: response.could_not_satisfy,
        })
    }

    // ── Bookkeeping ────────────────────────────────────────────────

    fn done(&self, ctx: &mut PassCtx, d: &Directive, outcome: &str) {
        ctx.resolved.push(d.label());
        self.handler.on_event(&CompileEvent::DirectiveResolved {
            name: &d.name,
            line: d.line,
            outcome,
        });
    }

    pub(crate) fn warn(&self, ctx: &PassCtx, state: &mut RunState, message: impl Into<String>) {
        state.report(self.handler, Diagnostic::warning(ctx.scoped(message)));
    }

    pub(crate) fn error(&self, ctx: &PassCtx, state: &mut RunState, message: impl Into<String>) {
        state.report(self.handler, Diagnostic::error(ctx.scoped(message)));
    }

    pub(crate) fn suggest(&self, ctx: &PassCtx, state: &mut RunState, message: impl Into<String>) {
        state.report(self.handler, Diagnostic::suggestion(ctx.scoped(message)));
    }
}

// ── Helpers ────────────────────────────────────────────────────────

enum Segment {
    Run(Vec<DocumentNode>),
    Barrier(DocumentNode),
}

fn is_local(d: &Directive, mode: TargetMode) -> bool {
    match mode {
        TargetMode::Body => d.has_body() || d.params.contains_key("file"),
        TargetMode::Extract => d.params.contains_key("file"),
        TargetMode::Instruction => false,
    }
}

fn is_scope_wide_directive(d: &Directive) -> bool {
    matches!(
        d.spec().map(|s| s.handler),
        Some(
            Handler::Assert
                | Handler::Refine
                | Handler::Query(Query::Structure)
                | Handler::Transform(..)
        )
    )
}

fn is_scope_wide(node: &DocumentNode) -> bool {
    node.as_directive().is_some_and(is_scope_wide_directive)
}

/// Operations that can produce text from an empty target.
fn is_additive(op: Operation) -> bool {
    matches!(
        op,
        Operation::Expand
            | Operation::GenerateExamples
            | Operation::OutputFormat
            | Operation::StructuralConstraints
    )
}

/// Positional text and body, joined: the instruction or criterion.
fn instruction_text(d: &Directive, unit: usize) -> String {
    [d.free_text(), d.body_text(unit)]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove the `@else` that directly follows an `@if` at the same depth.
fn take_else(queue: &mut VecDeque<DocumentNode>, indent: usize) -> Option<Directive> {
    let idx = queue.iter().position(|n| !n.is_blank())?;
    match queue.get(idx) {
        Some(DocumentNode::Directive(e)) if e.name == "else" && e.indent == indent => {}
        _ => return None,
    }
    queue.drain(..idx);
    match queue.pop_front() {
        Some(DocumentNode::Directive(e)) => Some(e),
        _ => None,
    }
}

fn splice_front(queue: &mut VecDeque<DocumentNode>, nodes: Vec<DocumentNode>) {
    for node in nodes.into_iter().rev() {
        queue.push_front(node);
    }
}

/// Shift nodes `levels` deeper, for bodies spliced at an indented header.
fn reindent(nodes: Vec<DocumentNode>, levels: usize, unit: usize) -> Vec<DocumentNode> {
    if levels == 0 {
        return nodes;
    }
    let pad = " ".repeat(levels * unit);
    nodes
        .into_iter()
        .map(|node| match node {
            DocumentNode::Text(t) if t.is_empty() => DocumentNode::Text(t),
            DocumentNode::Text(t) => DocumentNode::Text(format!("{pad}{t}")),
            DocumentNode::Directive(mut d) => {
                d.indent += levels;
                DocumentNode::Directive(d)
            }
        })
        .collect()
}

fn render_segments(segments: &[Segment], unit: usize) -> String {
    let nodes: Vec<DocumentNode> = segments
        .iter()
        .flat_map(|s| match s {
            Segment::Run(nodes) => nodes.clone(),
            Segment::Barrier(node) => vec![node.clone()],
        })
        .collect();
    render(&nodes, unit)
}

/// Bounds of a run's content, excluding leading and trailing blank lines.
fn core_bounds(nodes: &[DocumentNode]) -> (usize, usize) {
    let start = nodes.iter().position(|n| !n.is_blank()).unwrap_or(nodes.len());
    let end = nodes
        .iter()
        .rposition(|n| !n.is_blank())
        .map_or(start, |i| i + 1);
    (start, end.max(start))
}

fn run_core(segments: &[Segment], run: usize, unit: usize) -> String {
    match segments.get(run) {
        Some(Segment::Run(nodes)) => {
            let (start, end) = core_bounds(nodes);
            render(nodes.get(start..end).unwrap_or_default(), unit)
        }
        _ => String::new(),
    }
}

fn replace_run_core(segments: &mut [Segment], run: usize, text: &str) {
    if let Some(Segment::Run(nodes)) = segments.get_mut(run) {
        let (start, end) = core_bounds(nodes);
        nodes.splice(start..end, text_nodes(text));
    }
}

fn transition_entry(pass: u32, resolved: &[String], substituted: bool) -> String {
    let mut entry = format!("pass {pass}: ");
    if resolved.is_empty() {
        entry.push_str("no directives resolved");
    } else {
        entry.push_str(&format!(
            "resolved {} directive(s): {}",
            resolved.len(),
            resolved.join(", ")
        ));
    }
    if substituted {
        entry.push_str("; variables substituted");
    }
    entry.push_str("; text changed");
    entry
}
