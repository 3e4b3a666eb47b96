//! Runtime settings.
//!
//! # Responsibility
//! - Deserialize the JSON settings file naming environments and directories.
//! - Derive registry table paths and create the directory layout.
//!
//! # Invariants
//! - Environment order is the column order of every registry table.
//! - Relative directories in a settings file resolve against that file's
//!   directory.

use crate::logging::{default_log_level, init_logging};
use crate::model::environment::Environment;
use crate::repo::csv_store::{CsvRegistryStore, RegistryPaths};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

fn default_resources_dir() -> PathBuf {
    PathBuf::from("resources")
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from("workflows")
}

fn default_dropdowns_dir() -> PathBuf {
    PathBuf::from("dropdowns")
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read `{}`: {source}", path.display()),
            Self::Parse(err) => write!(f, "invalid settings: {err}"),
            Self::Invalid(details) => write!(f, "invalid settings: {details}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    /// Defaults to the build-mode level.
    #[serde(default)]
    pub level: Option<String>,
    /// Log directory; logging stays off when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub environments: Vec<Environment>,
    #[serde(default = "default_resources_dir")]
    pub resources_dir: PathBuf,
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,
    #[serde(default = "default_dropdowns_dir")]
    pub dropdowns_dir: PathBuf,
    #[serde(default)]
    pub logging: LogSettings,
}

impl Settings {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and validates a settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_json_str(&text)?;
        if let Some(base) = path.parent() {
            settings.resolve_relative_to(base);
        }
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environments.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one environment is required".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for env in &self.environments {
            if !seen.insert(env) {
                return Err(ConfigError::Invalid(format!(
                    "environment `{env}` is listed more than once"
                )));
            }
        }
        Ok(())
    }

    pub fn registry_paths(&self) -> RegistryPaths {
        RegistryPaths::in_dir(&self.resources_dir)
    }

    /// CSV store over the configured resources directory.
    pub fn csv_store(&self) -> CsvRegistryStore {
        CsvRegistryStore::new(self.registry_paths(), self.environments.clone())
    }

    /// Creates the resources, workflow and dropdown directories.
    pub fn ensure_layout(&self) -> Result<(), ConfigError> {
        for dir in [&self.resources_dir, &self.workflows_dir, &self.dropdowns_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Starts file logging when a log directory is configured.
    ///
    /// Returns `Ok(false)` when logging is not configured.
    pub fn init_logging(&self) -> Result<bool, ConfigError> {
        let Some(dir) = &self.logging.dir else {
            return Ok(false);
        };
        let level = self.logging.level.as_deref().unwrap_or(default_log_level());
        init_logging(level, dir).map_err(ConfigError::Invalid)?;
        Ok(true)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for dir in [
            &mut self.resources_dir,
            &mut self.workflows_dir,
            &mut self.dropdowns_dir,
        ]
        .into_iter()
        .chain(self.logging.dir.as_mut())
        {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}
