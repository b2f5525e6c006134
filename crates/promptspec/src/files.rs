//! File access for `@refine`, `@embed`, and file-form lossy directives.
//!
//! The engine only ever reads through the [`FileReader`] trait. [`FsReader`]
//! serves files from a base directory and refuses paths that escape it;
//! [`MemoryReader`] serves a fixed set of documents for tests and embedding.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Why a read failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReadError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("path '{}' escapes the base directory", .0.display())]
    Escapes(PathBuf),
    #[error("failed to read '{}': {reason}", .path.display())]
    Io { path: PathBuf, reason: String },
}

/// Source of included documents.
pub trait FileReader: Send + Sync {
    /// Read a document. `path` is relative to the reader's root and has
    /// already been normalized by [`normalize`].
    fn read(&self, path: &Path) -> Result<String, ReadError>;
}

/// Lexically normalize a relative path, resolving `.` and `..`.
///
/// Fails with [`ReadError::Escapes`] when the path is absolute or climbs
/// above its starting directory.
pub fn normalize(path: &Path) -> Result<PathBuf, ReadError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                if !out.pop() {
                    return Err(ReadError::Escapes(path.to_path_buf()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ReadError::Escapes(path.to_path_buf()));
            }
        }
    }
    Ok(out)
}

/// Resolve `target` relative to the directory of the document that names it.
pub fn resolve_relative(including: Option<&Path>, target: &str) -> Result<PathBuf, ReadError> {
    let joined = match including.and_then(Path::parent) {
        Some(dir) => dir.join(target.trim()),
        None => PathBuf::from(target.trim()),
    };
    normalize(&joined)
}

// ── FsReader ───────────────────────────────────────────────────────

/// Reads documents from disk below a base directory.
#[derive(Debug, Clone)]
pub struct FsReader {
    base_dir: PathBuf,
}

impl FsReader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl FileReader for FsReader {
    fn read(&self, path: &Path) -> Result<String, ReadError> {
        let relative = normalize(path)?;
        let full = self.base_dir.join(&relative);
        debug!("reading {}", full.display());
        match fs::read_to_string(&full) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ReadError::NotFound(relative)),
            Err(e) => Err(ReadError::Io {
                path: relative,
                reason: e.to_string(),
            }),
        }
    }
}

// ── MemoryReader ───────────────────────────────────────────────────

/// Serves documents from an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    files: HashMap<PathBuf, String>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document (builder pattern).
    pub fn with_file(mut self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let key = normalize(path.as_ref()).unwrap_or_else(|_| path.as_ref().to_path_buf());
        self.files.insert(key, content.into());
    }
}

impl FileReader for MemoryReader {
    fn read(&self, path: &Path) -> Result<String, ReadError> {
        let key = normalize(path)?;
        self.files
            .get(&key)
            .cloned()
            .ok_or(ReadError::NotFound(key))
    }
}
