//! Error types for the Tessera engine.

use crate::{CollectionKey, VersionId};
use thiserror::Error;

/// All possible errors from the Tessera engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Definition errors
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("duplicate key '{key}' in {scope}")]
    DuplicateKey { key: String, scope: String },

    #[error("field '{0}' cannot contain nested fields")]
    UnexpectedNestedFields(String),

    #[error("tab '{0}' is only allowed at the root of a brick or the document fields")]
    NestedTab(String),

    #[error("field '{key}' of type {field_type} does not support translations")]
    UnsupportedTranslation { key: String, field_type: String },

    #[error("brick key '{0}' is reserved")]
    ReservedBrickKey(String),

    #[error("identifier '{0}' exceeds 63 bytes")]
    IdentifierTooLong(String),

    #[error("invalid environment '{0}'")]
    InvalidEnvironment(String),

    // Input errors
    #[error("unknown field '{key}' in {scope}")]
    UnknownField { key: String, scope: String },

    #[error("unknown brick '{0}'")]
    UnknownBrick(String),

    #[error("fixed brick '{0}' appears more than once")]
    DuplicateFixedBrick(String),

    #[error("invalid value for field '{field}': expected {expected}")]
    InvalidFieldValue { field: String, expected: String },

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("repeater '{field}' has {count} groups, allowed {min}..={max}")]
    GroupCountOutOfRange {
        field: String,
        count: usize,
        min: usize,
        max: usize,
    },

    #[error("unknown locale '{0}'")]
    UnknownLocale(String),

    #[error("invalid locale set: {0}")]
    InvalidLocales(String),

    // Migration errors
    #[error("plan contains {} destructive operation(s) that require confirmation", operations.len())]
    ConfirmationRequired { operations: Vec<String> },

    #[error("{dialect} cannot express {operation}")]
    UnsupportedOperation {
        dialect: &'static str,
        operation: String,
    },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    // Promotion errors
    #[error("collection '{0}' requires a migration before documents can be promoted")]
    MigrationRequired(CollectionKey),

    #[error("version {version_id} is already of type '{version_type}'")]
    SameVersionType {
        version_id: VersionId,
        version_type: String,
    },

    #[error("version {0} is a revision and cannot be promoted without explicit permission")]
    RevisionSource(VersionId),

    #[error("cannot promote to version type '{0}'")]
    InvalidTargetVersion(String),

    #[error("version not found: {0}")]
    VersionNotFound(VersionId),
}

impl Error {
    /// Whether the error stems from a malformed collection definition.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidKey { .. }
                | Error::DuplicateKey { .. }
                | Error::UnexpectedNestedFields(_)
                | Error::NestedTab(_)
                | Error::UnsupportedTranslation { .. }
                | Error::ReservedBrickKey(_)
                | Error::IdentifierTooLong(_)
                | Error::InvalidEnvironment(_)
        )
    }

    /// Whether the error rejects a promotion before anything is written.
    pub fn is_promotion_error(&self) -> bool {
        matches!(
            self,
            Error::MigrationRequired(_)
                | Error::SameVersionType { .. }
                | Error::RevisionSource(_)
                | Error::InvalidTargetVersion(_)
                | Error::VersionNotFound(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::DuplicateKey {
            key: "title".into(),
            scope: "tsr_blog__fields".into(),
        };
        assert_eq!(err.to_string(), "duplicate key 'title' in tsr_blog__fields");

        let err = Error::ConfirmationRequired {
            operations: vec!["drop column _a".into(), "drop table t".into()],
        };
        assert_eq!(
            err.to_string(),
            "plan contains 2 destructive operation(s) that require confirmation"
        );

        let err = Error::SameVersionType {
            version_id: 4,
            version_type: "published".into(),
        };
        assert_eq!(
            err.to_string(),
            "version 4 is already of type 'published'"
        );
    }

    #[test]
    fn error_classes() {
        assert!(Error::NestedTab("content".into()).is_definition_error());
        assert!(!Error::UnknownLocale("de".into()).is_definition_error());
        assert!(Error::MigrationRequired("blog".into()).is_promotion_error());
        assert!(!Error::InvalidSnapshot("x".into()).is_promotion_error());
    }
}
