//! Workflow export artifacts kept alongside the registry.
//!
//! # Responsibility
//! - Receive exported workflow documents for mapped protocols and groups.
//! - Drop exports of protocols an environment no longer lists.
//!
//! # Invariants
//! - One export per (environment, protocol short title).
//! - `/` in short titles never reaches the filesystem path.

use crate::model::environment::Environment;
use crate::model::registry::ProtocolRecord;
use log::info;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ArtifactError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize(serde_json::Error),
}

impl Display for ArtifactError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Serialize(err) => write!(f, "workflow export is not serializable: {err}"),
        }
    }
}

impl Error for ArtifactError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serialize(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for ArtifactError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value)
    }
}

/// Receiver of workflow exports observed during sync.
pub trait WorkflowArtifacts: Send + Sync {
    fn store(
        &self,
        env: &Environment,
        protocol: &ProtocolRecord,
        workflow: &Value,
    ) -> Result<(), ArtifactError>;

    /// Returns `true` when an export existed and was removed.
    fn remove(&self, env: &Environment, protocol: &ProtocolRecord) -> Result<bool, ArtifactError>;
}

/// Filesystem archive: `<root>/<env>/<shortTitle>.json` for protocols and
/// `<root>/<env>/<shortTitle> Group Workflows.json` for groups.
#[derive(Debug, Clone)]
pub struct WorkflowArchive {
    root: PathBuf,
}

impl WorkflowArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, env: &Environment, protocol: &ProtocolRecord) -> PathBuf {
        let title = protocol.short_title.replace('/', "_");
        let file_name = if protocol.is_group() {
            format!("{title} Group Workflows.json")
        } else {
            format!("{title}.json")
        };
        self.root.join(env.as_str()).join(file_name)
    }

    /// Reads one archived export back.
    pub fn load(
        &self,
        env: &Environment,
        protocol: &ProtocolRecord,
    ) -> Result<Option<Value>, ArtifactError> {
        let path = self.artifact_path(env, protocol);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArtifactError::Io { path, source }),
        }
    }
}

impl WorkflowArtifacts for WorkflowArchive {
    fn store(
        &self,
        env: &Environment,
        protocol: &ProtocolRecord,
        workflow: &Value,
    ) -> Result<(), ArtifactError> {
        let path = self.artifact_path(env, protocol);
        let io_error = |source: std::io::Error| ArtifactError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = serde_json::to_string_pretty(workflow)?;
        std::fs::write(&path, text).map_err(io_error)?;

        info!(
            "event=workflow_export module=sync status=ok env={} kind={}",
            env,
            protocol.kind().as_str()
        );
        Ok(())
    }

    fn remove(&self, env: &Environment, protocol: &ProtocolRecord) -> Result<bool, ArtifactError> {
        let path = self.artifact_path(env, protocol);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ArtifactError::Io { path, source }),
        }
    }
}
