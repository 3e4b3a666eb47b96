//! Registry use-case service.
//!
//! # Responsibility
//! - Encode flat records into extension payloads for one environment.
//! - Translate workflow documents between environments.
//!
//! # Invariants
//! - Every call reads the store again; no snapshot outlives one call, so a
//!   completed synchronization is visible to the next call.

use crate::codec::extension::{BatchOutcome, ExtensionCodec, ExtensionPayload, FlatRecord, FormRef};
use crate::model::environment::Environment;
use crate::model::registry::{RegistrySnapshot, ResolutionError};
use crate::repo::registry_repo::{RegistryStore, RepoError};
use crate::translate::sink::DocumentSink;
use crate::translate::translator::{
    FieldTranslator, TranslateError, TranslateOptions, TranslationReport,
};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for registry use-cases.
#[derive(Debug)]
pub enum RegistryServiceError {
    /// Registry tables could not be loaded.
    Repo(RepoError),
    /// A form, field or reference is missing from the registry.
    Resolution(ResolutionError),
    /// Translated document could not be persisted.
    Sink(String),
}

impl Display for RegistryServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Resolution(err) => write!(f, "{err}"),
            Self::Sink(message) => write!(f, "failed to persist translated document: {message}"),
        }
    }
}

impl Error for RegistryServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Resolution(err) => Some(err),
            Self::Sink(_) => None,
        }
    }
}

impl From<RepoError> for RegistryServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<ResolutionError> for RegistryServiceError {
    fn from(value: ResolutionError) -> Self {
        Self::Resolution(value)
    }
}

impl From<TranslateError> for RegistryServiceError {
    fn from(value: TranslateError) -> Self {
        match value {
            TranslateError::Resolution(err) => Self::Resolution(err),
            TranslateError::Sink(message) => Self::Sink(message),
        }
    }
}

/// Registry service facade over store implementations.
pub struct RegistryService<S: RegistryStore> {
    store: S,
}

impl<S: RegistryStore> RegistryService<S> {
    /// Creates a service reading from `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the current registry tables.
    pub fn snapshot(&self) -> Result<RegistrySnapshot, RegistryServiceError> {
        Ok(self.store.load_snapshot()?)
    }

    /// Encodes one flat record of `form` for `env`.
    pub fn encode_extension(
        &self,
        env: &Environment,
        form: &FormRef,
        record: &FlatRecord,
    ) -> Result<ExtensionPayload, RegistryServiceError> {
        let snapshot = self.snapshot()?;
        Ok(ExtensionCodec::new(&snapshot).encode(env, form, record)?)
    }

    /// Encodes many records against one snapshot, collecting per-record
    /// failures.
    pub fn encode_extension_batch(
        &self,
        env: &Environment,
        form: &FormRef,
        records: &[FlatRecord],
    ) -> Result<BatchOutcome, RegistryServiceError> {
        let snapshot = self.snapshot()?;
        Ok(ExtensionCodec::new(&snapshot).encode_batch(env, form, records))
    }

    /// Rewrites `document` from `source` to `target` field codes.
    pub fn translate_workflow(
        &self,
        document: &Value,
        source: &Environment,
        target: &Environment,
        sink: &mut dyn DocumentSink,
        options: TranslateOptions,
    ) -> Result<TranslationReport, RegistryServiceError> {
        let snapshot = self.snapshot()?;
        Ok(FieldTranslator::new(&snapshot, options).translate(document, source, target, sink)?)
    }
}
