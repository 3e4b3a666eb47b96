//! Canonical cross-environment identity registry for platform protocols,
//! forms and fields, with the codec and translator built on it.

pub mod codec;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;
pub mod translate;

pub use codec::extension::{BatchOutcome, ExtensionCodec, ExtensionPayload, FlatRecord, FormRef};
pub use config::{ConfigError, LogSettings, Settings};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::environment::{Environment, EnvironmentError};
pub use model::registry::{
    FieldKey, FieldMapping, FieldRecord, FormMapping, FormRecord, ProtocolRecord,
    RegistrySnapshot, ResolutionError,
};
pub use repo::csv_store::{CsvRegistryStore, RegistryPaths};
pub use repo::registry_repo::{RegistryStore, RepoError, RepoResult};
pub use repo::sqlite_store::SqliteRegistryStore;
pub use service::registry_service::{RegistryService, RegistryServiceError};
pub use sync::environment_registry::EnvironmentRegistry;
pub use sync::environment_spi::{ClientError, EnvironmentClient};
pub use sync::report::{SyncError, SyncReport};
pub use sync::synchronizer::RegistrySynchronizer;
pub use translate::sink::{DocumentSink, FileSink, MemorySink};
pub use translate::translator::{
    FieldTranslator, TranslateError, TranslateOptions, TranslationReport,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
