//! Code sources the terminal runs, supplied by the host instead of read from
//! a particular editor widget.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub trait CodeProvider: Send + Sync {
    fn code(&self) -> String;
    fn language(&self) -> String;
}

/// In-memory editor contents the host keeps up to date.
#[derive(Debug, Clone, Default)]
pub struct SharedCode {
    inner: Arc<RwLock<(String, String)>>,
}

impl SharedCode {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new((code.into(), language.into()))),
        }
    }

    pub fn set_code(&self, code: impl Into<String>) {
        match self.inner.write() {
            Ok(mut guard) => guard.0 = code.into(),
            Err(poisoned) => poisoned.into_inner().0 = code.into(),
        }
    }

    pub fn set_language(&self, language: impl Into<String>) {
        match self.inner.write() {
            Ok(mut guard) => guard.1 = language.into(),
            Err(poisoned) => poisoned.into_inner().1 = language.into(),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&(String, String)) -> T) -> T {
        match self.inner.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl CodeProvider for SharedCode {
    fn code(&self) -> String {
        self.read(|(code, _)| code.clone())
    }

    fn language(&self) -> String {
        self.read(|(_, language)| language.clone())
    }
}

/// Source file re-read on every run.
#[derive(Debug, Clone)]
pub struct FileCode {
    path: PathBuf,
    language: String,
}

impl FileCode {
    pub fn new(path: impl Into<PathBuf>, language: Option<String>) -> Self {
        let path = path.into();
        let language = language.unwrap_or_else(|| language_for_path(&path).to_string());
        Self { path, language }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CodeProvider for FileCode {
    fn code(&self) -> String {
        match std::fs::read_to_string(&self.path) {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read source file");
                String::new()
            }
        }
    }

    fn language(&self) -> String {
        self.language.clone()
    }
}

/// Backend language name for a source file extension.
pub fn language_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("java") => "java",
        Some("cpp" | "cc" | "cxx" | "hpp") => "cpp",
        _ => "python",
    }
}
