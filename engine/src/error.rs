//! Error types for the Tandem engine.
//!
//! Every failure is one of three kinds. Configuration errors are fatal to the
//! single operation that raised them, remote errors skip the current record,
//! and transcode errors drop a single field from the outbound payload.
//! Unmapped selectors are not errors at all (see [`crate::Resolution`]).

use crate::{MappedTypeId, RecordId, Side};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of an [`Error`], used by the orchestrator to decide
/// how much of a pass to abandon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Configuration,
    Remote,
    Transcode,
}

/// All possible errors from the Tandem engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("update of '{entity_type}' requested without an id")]
    MissingId { entity_type: String },

    #[error("create of '{entity_type}' must not carry an id (got {id})")]
    UnexpectedId { entity_type: String, id: String },

    #[error("{side} record {id} of '{mapped_type}' is already linked to {existing}, refusing to link {requested}")]
    LinkConflict {
        mapped_type: MappedTypeId,
        side: Side,
        id: RecordId,
        existing: RecordId,
        requested: RecordId,
    },

    #[error("duplicate mapped type for {side} type '{entity_type}'")]
    DuplicateMappedType { side: Side, entity_type: String },

    #[error("unknown mapped type: {0}")]
    UnknownMappedType(MappedTypeId),

    #[error("recursion guard for {0} is already engaged")]
    GuardReentered(String),

    #[error("invalid mapping configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid link snapshot: {0}")]
    InvalidSnapshot(String),

    // Remote errors
    #[error("{operation} on '{entity_type}' failed: {message}")]
    Remote {
        operation: String,
        entity_type: String,
        message: String,
    },

    #[error("{side} record not found: {entity_type} {id}")]
    RecordNotFound {
        side: Side,
        entity_type: String,
        id: RecordId,
    },

    // Transcode errors
    #[error("cannot transcode field '{field}': {reason}")]
    Transcode { field: String, reason: String },
}

impl Error {
    /// Build a remote error from an adapter failure.
    pub fn remote(
        operation: impl Into<String>,
        entity_type: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Error::Remote {
            operation: operation.into(),
            entity_type: entity_type.into(),
            message: message.to_string(),
        }
    }

    /// Build a transcode error for a single field.
    pub fn transcode(field: impl Into<String>, reason: impl ToString) -> Self {
        Error::Transcode {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingId { .. }
            | Error::UnexpectedId { .. }
            | Error::LinkConflict { .. }
            | Error::DuplicateMappedType { .. }
            | Error::UnknownMappedType(_)
            | Error::GuardReentered(_)
            | Error::InvalidConfig(_)
            | Error::InvalidSnapshot(_) => ErrorKind::Configuration,
            Error::Remote { .. } | Error::RecordNotFound { .. } => ErrorKind::Remote,
            Error::Transcode { .. } => ErrorKind::Transcode,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::MissingId {
            entity_type: "Individual".into(),
        };
        assert_eq!(
            err.to_string(),
            "update of 'Individual' requested without an id"
        );

        let err = Error::remote("create", "Activity", "permission denied");
        assert_eq!(
            err.to_string(),
            "create on 'Activity' failed: permission denied"
        );

        let err = Error::LinkConflict {
            mapped_type: "people".into(),
            side: Side::Crm,
            id: 100,
            existing: 55,
            requested: 56,
        };
        assert_eq!(
            err.to_string(),
            "crm record 100 of 'people' is already linked to 55, refusing to link 56"
        );
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            Error::GuardReentered("crm -> content".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::remote("update", "Individual", "timeout").kind(),
            ErrorKind::Remote
        );
        assert_eq!(
            Error::transcode("birth_date", "unparseable").kind(),
            ErrorKind::Transcode
        );
    }
}
