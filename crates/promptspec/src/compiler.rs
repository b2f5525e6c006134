//! The public entry point: source text in, [`CompileOutput`] out.
//!
//! ```ignore
//! let compiler = Compiler::new(EchoOracle::new(), FsReader::new("specs"))
//!     .with_event_handler(LoggingHandler)
//!     .with_config(CompileConfig::default().with_max_passes(10));
//! let output = compiler.compile(&source, &bindings).await;
//! ```
//!
//! A fatal [`CompileError`] does not lose work: [`Compiler::compile`] folds
//! it into the diagnostics and assembles the partial text reached so far.
//! Use [`Compiler::try_compile`] to get the error itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::assemble::assemble;
use crate::config::CompileConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::engines;
use crate::error::{CompileError, CompileResult};
use crate::eval::{Evaluator, Resolved, RunState, Scope};
use crate::events::{EventHandler, NoopHandler};
use crate::files::{FileReader, normalize};
use crate::output::{CompileOutput, DiagnosticsReport};
use crate::semantic::SemanticOracle;
use crate::vars::Bindings;

#[derive(Clone)]
pub struct Compiler {
    oracle: Arc<dyn SemanticOracle>,
    reader: Arc<dyn FileReader>,
    handler: Arc<dyn EventHandler>,
    config: CompileConfig,
    source_path: Option<PathBuf>,
}

impl Compiler {
    pub fn new(oracle: impl SemanticOracle + 'static, reader: impl FileReader + 'static) -> Self {
        Self {
            oracle: Arc::new(oracle),
            reader: Arc::new(reader),
            handler: Arc::new(NoopHandler),
            config: CompileConfig::default(),
            source_path: None,
        }
    }

    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn with_config(mut self, config: CompileConfig) -> Self {
        self.config = config;
        self
    }

    /// Path of the source document relative to the reader's base. Relative
    /// includes resolve against its directory, and including it again is a
    /// cycle.
    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Compile `source`. Fatal errors become error diagnostics.
    pub async fn compile(&self, source: &str, bindings: &Bindings) -> CompileOutput {
        self.compile_with_seen(source, bindings, std::iter::empty::<String>())
            .await
    }

    /// Like [`compile`](Self::compile), suppressing diagnostics whose
    /// messages are in `seen` (e.g. already shown by an earlier run).
    pub async fn compile_with_seen<I, S>(
        &self,
        source: &str,
        bindings: &Bindings,
        seen: I,
    ) -> CompileOutput
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (result, mut state) = self
            .run(source, bindings, Diagnostics::with_seen(seen))
            .await;
        match result {
            Ok(resolved) => self.finish(resolved.text, Some(resolved.unit), state),
            Err(e) => {
                warn!("compilation failed: {e}");
                state.report(self.handler.as_ref(), Diagnostic::error(e.to_string()));
                let partial = std::mem::take(&mut state.partial);
                self.finish(partial, None, state)
            }
        }
    }

    /// Compile `source`, returning the fatal error if there is one.
    pub async fn try_compile(
        &self,
        source: &str,
        bindings: &Bindings,
    ) -> CompileResult<CompileOutput> {
        let (result, state) = self.run(source, bindings, Diagnostics::new()).await;
        let resolved = result?;
        Ok(self.finish(resolved.text, Some(resolved.unit), state))
    }

    /// Read `path` through the reader and compile it with its own location
    /// as the include base.
    pub async fn compile_file(
        &self,
        path: impl AsRef<Path>,
        bindings: &Bindings,
    ) -> CompileResult<CompileOutput> {
        let path = normalize(path.as_ref())?;
        let source = self.reader.read(&path)?;
        Ok(self
            .clone()
            .with_source_path(path)
            .compile(&source, bindings)
            .await)
    }

    /// Blocking wrapper around [`compile`](Self::compile).
    pub fn compile_blocking(&self, source: &str, bindings: &Bindings) -> CompileOutput {
        futures::executor::block_on(self.compile(source, bindings))
    }

    async fn run(
        &self,
        source: &str,
        bindings: &Bindings,
        diagnostics: Diagnostics,
    ) -> (CompileResult<Resolved>, RunState) {
        let mut state = RunState::new(diagnostics);
        if let Some(path) = &self.source_path {
            state.include_stack.push(path.clone());
        }
        info!(
            "compiling {} bytes with {} oracle (max {} passes)",
            source.len(),
            self.oracle.name(),
            self.config.max_passes
        );
        let evaluator = Evaluator::new(
            self.oracle.as_ref(),
            self.reader.as_ref(),
            self.handler.as_ref(),
            &self.config,
            bindings,
        );
        let result = evaluator
            .fixpoint(source, Scope::document(self.source_path.clone()), &mut state)
            .await;
        if let Ok(resolved) = &result {
            info!("fixpoint after {} pass(es)", resolved.passes);
        }
        (result, state)
    }

    fn finish(&self, text: String, unit: Option<usize>, mut state: RunState) -> CompileOutput {
        let handler = self.handler.as_ref();
        let assembled = assemble(&text, unit, self.config.unescape);
        for w in assembled.warnings {
            state.report(handler, Diagnostic::warning(w));
        }
        if let Some(execution) = state.execution.get() {
            for w in engines::missing_prompts(&execution.strategy_type, &assembled.prompts) {
                state.report(handler, Diagnostic::warning(w));
            }
        }

        CompileOutput {
            composed_prompt: assembled.composed_prompt,
            prompts: assembled.prompts,
            prompt_roles: assembled.prompt_roles,
            tools: state.tools.definitions(),
            execution: state.execution.to_json(),
            diagnostics: DiagnosticsReport::from(&state.diagnostics),
            transitions: state.transitions,
            analysis: state.analysis,
            semantic_calls: state.semantic_calls,
        }
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("oracle", &self.oracle.name())
            .field("config", &self.config)
            .field("source_path", &self.source_path)
            .finish_non_exhaustive()
    }
}

/// Compile with the offline echo oracle and in-memory files.
#[cfg(test)]
pub(crate) fn offline() -> Compiler {
    Compiler::new(
        crate::semantic::echo::EchoOracle::new(),
        crate::files::MemoryReader::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::MemoryReader;
    use crate::semantic::echo::EchoOracle;

    #[tokio::test]
    async fn fatal_error_keeps_partial_text() {
        let output = offline()
            .compile("Intro.\n@refine missing.md\n  Body.", &Bindings::new())
            .await;
        assert!(output.has_errors());
        assert!(output.errors()[0].contains("missing.md"));
        assert!(output.composed_prompt.contains("Intro."));
    }

    #[tokio::test]
    async fn try_compile_surfaces_the_error() {
        let result = offline()
            .try_compile("@refine missing.md\n  Body.", &Bindings::new())
            .await;
        assert!(matches!(result, Err(CompileError::MissingRefineTarget { .. })));
    }

    #[tokio::test]
    async fn compile_file_resolves_relative_includes() {
        let reader = MemoryReader::new()
            .with_file("specs/main.md", "@refine base.md\n  Extra.")
            .with_file("specs/base.md", "Base.");
        let compiler = Compiler::new(EchoOracle::new(), reader);
        let output = compiler
            .compile_file("specs/main.md", &Bindings::new())
            .await
            .unwrap();
        assert!(!output.has_errors(), "{:?}", output.errors());
        assert!(output.composed_prompt.contains("Base."));
        assert!(output.composed_prompt.contains("Extra."));
    }

    #[tokio::test]
    async fn self_inclusion_is_a_cycle() {
        let reader = MemoryReader::new().with_file("main.md", "@refine main.md\n  Again.");
        let compiler = Compiler::new(EchoOracle::new(), reader);
        let output = compiler
            .compile_file("main.md", &Bindings::new())
            .await
            .unwrap();
        assert!(output.errors()[0].contains("main.md -> main.md"));
    }

    #[tokio::test]
    async fn strategy_prompts_are_checked() {
        let output = offline()
            .compile(
                "@execute reflection\n@prompt generate\n  Draft.",
                &Bindings::new(),
            )
            .await;
        assert_eq!(output.execution["type"], "reflection");
        let missing: Vec<&String> = output
            .warnings()
            .iter()
            .filter(|w| w.contains("expects a '@prompt"))
            .collect();
        assert_eq!(missing.len(), 2);
    }

    #[test]
    fn blocking_wrapper() {
        let output = offline().compile_blocking("Hello {{name}}.", &Bindings::new().with("name", "Ada"));
        assert_eq!(output.composed_prompt, "Hello Ada.");
        assert_eq!(output.prompts["default"], "Hello Ada.");
    }
}
