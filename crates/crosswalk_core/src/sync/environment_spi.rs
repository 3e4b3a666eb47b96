//! Read-side contract every environment adapter implements.
//!
//! # Responsibility
//! - Expose the idempotent listing endpoints the synchronizer consumes.
//! - Classify adapter failures so the synchronizer can scope them.
//!
//! # Invariants
//! - Implementations never mutate the remote environment.
//! - Transport and authentication stay inside the adapter.

use crate::model::environment::Environment;
use crate::model::listing::{
    DropdownListing, FormDefinition, FormListing, ProtocolGroupListing, ProtocolListing,
};
use crate::model::registry::ProtocolKind;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ClientResult<T> = Result<T, ClientError>;

/// Failure class reported by an environment adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Network, TLS or timeout failure before a response was read.
    Transport,
    /// The environment answered with a non-success status.
    Rejected { code: u16 },
    /// The response body did not match the expected shape.
    Malformed,
}

impl ClientErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Rejected { .. } => "rejected",
            Self::Malformed => "malformed",
        }
    }
}

/// Error returned by one adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    /// Adapter operation name, e.g. `list_forms`.
    pub operation: &'static str,
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(operation: &'static str, kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ClientErrorKind::Transport, message)
    }

    pub fn rejected(operation: &'static str, code: u16, message: impl Into<String>) -> Self {
        Self::new(operation, ClientErrorKind::Rejected { code }, message)
    }

    pub fn malformed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ClientErrorKind::Malformed, message)
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ClientErrorKind::Rejected { code } => write!(
                f,
                "{} rejected with status {code}: {}",
                self.operation, self.message
            ),
            kind => write!(f, "{} failed ({}): {}", self.operation, kind.as_str(), self.message),
        }
    }
}

impl Error for ClientError {}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        Self::malformed("decode", value.to_string())
    }
}

/// Read endpoints of one environment.
pub trait EnvironmentClient: Send + Sync {
    /// Environment this adapter talks to.
    fn environment(&self) -> &Environment;

    fn list_protocols(&self) -> ClientResult<Vec<ProtocolListing>>;

    fn list_protocol_groups(&self) -> ClientResult<Vec<ProtocolGroupListing>>;

    fn list_forms(&self) -> ClientResult<Vec<FormListing>>;

    /// Field layout of one form, including nested subform fields.
    fn get_form_definition(&self, form_id: i64) -> ClientResult<FormDefinition>;

    /// Exported workflow document of one protocol or group.
    ///
    /// `Ok(None)` means the environment exposes no workflow export.
    fn get_workflow(&self, _kind: ProtocolKind, _id: i64) -> ClientResult<Option<Value>> {
        Ok(None)
    }

    fn list_dropdowns(&self) -> ClientResult<Vec<DropdownListing>> {
        Ok(Vec::new())
    }

    /// Permissible values of one dropdown attribute.
    fn get_dropdown_values(&self, _attribute: &str) -> ClientResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::ClientError;

    #[test]
    fn display_includes_operation_and_status() {
        let rejected = ClientError::rejected("list_forms", 401, "token expired");
        assert_eq!(
            rejected.to_string(),
            "list_forms rejected with status 401: token expired"
        );

        let transport = ClientError::transport("list_protocols", "connection reset");
        assert_eq!(
            transport.to_string(),
            "list_protocols failed (transport): connection reset"
        );
    }
}
