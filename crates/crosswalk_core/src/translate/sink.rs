//! Destinations for partially and fully rewritten documents.

use serde_json::Value;
use std::path::{Path, PathBuf};

/// Receives the whole working document after every accepted rewrite.
///
/// Errors are human-readable strings surfaced as `TranslateError::Sink`.
pub trait DocumentSink {
    fn persist(&mut self, document: &Value) -> Result<(), String>;
}

/// Keeps the last persisted document in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    latest: Option<Value>,
    writes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&Value> {
        self.latest.as_ref()
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl DocumentSink for MemorySink {
    fn persist(&mut self, document: &Value) -> Result<(), String> {
        self.latest = Some(document.clone());
        self.writes += 1;
        Ok(())
    }
}

/// Writes pretty-printed JSON to one file, replacing it on every persist.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSink for FileSink {
    fn persist(&mut self, document: &Value) -> Result<(), String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("failed to create `{}`: {err}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(document)
            .map_err(|err| format!("failed to serialize document: {err}"))?;
        std::fs::write(&self.path, text)
            .map_err(|err| format!("failed to write `{}`: {err}", self.path.display()))
    }
}
