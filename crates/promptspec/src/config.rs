//! Configuration for a [`Compiler`](crate::compiler::Compiler).
//!
//! ```ignore
//! let config = CompileConfig::default()
//!     .with_max_passes(10)
//!     .with_base_dir("specs")
//!     .with_strict_contracts(false);
//! ```

use std::path::{Path, PathBuf};

use clap::ValueEnum;

/// Hard cap on fixpoint passes per document.
pub const DEFAULT_MAX_PASSES: u32 = 25;

#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Passes allowed before the run fails with `FixpointExceeded`.
    pub max_passes: u32,
    /// Directory that included and embedded files are resolved against.
    pub base_dir: PathBuf,
    /// `expand` contract violations are errors (otherwise warnings).
    pub strict_contracts: bool,
    /// Turn escaped `@@` into literal `@` in the final output.
    pub unescape: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            base_dir: PathBuf::from("."),
            strict_contracts: true,
            unescape: true,
        }
    }
}

impl CompileConfig {
    pub fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_strict_contracts(mut self, strict: bool) -> Self {
        self.strict_contracts = strict;
        self
    }

    pub fn with_unescape(mut self, unescape: bool) -> Self {
        self.unescape = unescape;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// How the CLI prints a compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Composed text, then tool and execution JSON.
    #[default]
    Markdown,
    /// The full output object.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CompileConfig::default();
        assert_eq!(config.max_passes, 25);
        assert!(config.strict_contracts);
        assert!(config.unescape);
        assert_eq!(config.base_dir(), Path::new("."));
    }

    #[test]
    fn pass_cap_is_at_least_one() {
        assert_eq!(CompileConfig::default().with_max_passes(0).max_passes, 1);
    }
}
