//! Registry store contract and repository errors.

use crate::db::DbError;
use crate::model::registry::{FieldTable, FormTable, ProtocolTable, RegistrySnapshot};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from registry persistence.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Csv {
        path: PathBuf,
        source: csv::Error,
    },
    /// A persisted table lacks one of its canonical-key columns.
    MissingColumn {
        table: &'static str,
        column: String,
    },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to registry rows.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Csv { path, source } => write!(f, "{}: {source}", path.display()),
            Self::MissingColumn { table, column } => {
                write!(f, "{table} table is missing required column `{column}`")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "registry store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid registry data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            Self::MissingColumn { .. } => None,
            Self::UninitializedConnection { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Whole-table persistence for the three registry tables.
pub trait RegistryStore {
    fn load_protocols(&self) -> RepoResult<ProtocolTable>;
    fn save_protocols(&self, table: &ProtocolTable) -> RepoResult<()>;
    fn load_forms(&self) -> RepoResult<FormTable>;
    fn save_forms(&self, table: &FormTable) -> RepoResult<()>;
    fn load_fields(&self) -> RepoResult<FieldTable>;
    fn save_fields(&self, table: &FieldTable) -> RepoResult<()>;

    /// Loads all three tables as one read-only snapshot.
    fn load_snapshot(&self) -> RepoResult<RegistrySnapshot> {
        Ok(RegistrySnapshot {
            protocols: self.load_protocols()?,
            forms: self.load_forms()?,
            fields: self.load_fields()?,
        })
    }
}

impl<S: RegistryStore + ?Sized> RegistryStore for &S {
    fn load_protocols(&self) -> RepoResult<ProtocolTable> {
        (**self).load_protocols()
    }

    fn save_protocols(&self, table: &ProtocolTable) -> RepoResult<()> {
        (**self).save_protocols(table)
    }

    fn load_forms(&self) -> RepoResult<FormTable> {
        (**self).load_forms()
    }

    fn save_forms(&self, table: &FormTable) -> RepoResult<()> {
        (**self).save_forms(table)
    }

    fn load_fields(&self) -> RepoResult<FieldTable> {
        (**self).load_fields()
    }

    fn save_fields(&self, table: &FieldTable) -> RepoResult<()> {
        (**self).save_fields(table)
    }
}
