//! Sync pass outcomes and hard failures.

use crate::model::environment::Environment;
use crate::model::registry::UpsertOutcome;
use crate::repo::registry_repo::RepoError;
use crate::sync::environment_registry::EnvironmentRegistryError;
use crate::sync::environment_spi::ClientError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Which pass produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
    Dropdowns,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Dropdowns => "dropdowns",
        }
    }
}

/// Listing stage that failed for one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Protocols,
    ProtocolGroups,
    Forms,
    Dropdowns,
}

impl SyncStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protocols => "protocols",
            Self::ProtocolGroups => "protocol_groups",
            Self::Forms => "forms",
            Self::Dropdowns => "dropdowns",
        }
    }
}

/// A listing call failed; the environment's pass was abandoned and none of
/// its changes were persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPartialFailure {
    pub stage: SyncStage,
    pub error: ClientError,
}

impl Display for SyncPartialFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} listing failed: {}", self.stage.as_str(), self.error)
    }
}

impl Error for SyncPartialFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// One entity could not be refreshed; the rest of the environment proceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    /// Entity class, e.g. `form_definition` or `workflow`.
    pub entity: &'static str,
    /// Canonical key of the affected row.
    pub key: String,
    pub message: String,
}

/// Row-level change counters for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub added: usize,
    pub updated: usize,
    pub nulled: usize,
    pub dropped: usize,
}

impl ChangeCounts {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Added => self.added += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableChanges {
    pub protocols: ChangeCounts,
    pub forms: ChangeCounts,
    pub fields: ChangeCounts,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty() && self.forms.is_empty() && self.fields.is_empty()
    }
}

/// Result of one environment within a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentOutcome {
    pub environment: Environment,
    pub failure: Option<SyncPartialFailure>,
    pub entity_failures: Vec<EntityFailure>,
    pub changes: TableChanges,
    pub artifacts_stored: usize,
    pub artifacts_removed: usize,
}

impl EnvironmentOutcome {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            failure: None,
            entity_failures: Vec::new(),
            changes: TableChanges::default(),
            artifacts_stored: 0,
            artifacts_removed: 0,
        }
    }

    /// `true` when the environment completed without any failure.
    pub fn is_clean(&self) -> bool {
        self.failure.is_none() && self.entity_failures.is_empty()
    }
}

/// Report of one sync pass across environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub mode: SyncMode,
    pub environments: Vec<EnvironmentOutcome>,
}

impl SyncReport {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            environments: Vec::new(),
        }
    }

    pub fn outcome(&self, env: &Environment) -> Option<&EnvironmentOutcome> {
        self.environments
            .iter()
            .find(|outcome| &outcome.environment == env)
    }

    pub fn has_failures(&self) -> bool {
        self.environments.iter().any(|outcome| !outcome.is_clean())
    }
}

/// Hard failures that stop a pass.
#[derive(Debug)]
pub enum SyncError {
    /// Registry tables could not be loaded or persisted.
    Store(RepoError),
    /// No adapter is registered for a requested environment.
    Environment(EnvironmentRegistryError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "registry store failed: {err}"),
            Self::Environment(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Environment(err) => Some(err),
        }
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

impl From<EnvironmentRegistryError> for SyncError {
    fn from(value: EnvironmentRegistryError) -> Self {
        Self::Environment(value)
    }
}
