// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for blockhost.
//!
//! Domain conditions (registry conflicts, lookup failures, preflight failures)
//! get their own variants. Storage and sandbox faults are carried through
//! transparently so callers can tell "expected condition" from "system fault".

use std::path::PathBuf;

use sqlx::error::ErrorKind;
use thiserror::Error;

use crate::db::InstanceId;

/// Blockhost errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A version with the same (name, version) pair is already registered.
    #[error("Version {name}@{version} already exists")]
    VersionAlreadyExists {
        /// Block name.
        name: String,
        /// Block version.
        version: String,
    },

    /// The version is still referenced by at least one instance.
    #[error("Version {name}@{version} is in use by one or more instances")]
    VersionInUse {
        /// Block name.
        name: String,
        /// Block version.
        version: String,
    },

    /// No version is registered for the (name, version) pair.
    #[error("Version {name}@{version} not found")]
    VersionNotFound {
        /// Block name.
        name: String,
        /// Block version.
        version: String,
    },

    /// No persisted instance has this id.
    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// The version's root directory does not exist on disk.
    #[error("Version folder not found: {}", .0.display())]
    VersionFolderNotFound(PathBuf),

    /// The version's root directory exists but its entry file does not.
    #[error("Version entry file not found: {}", .0.display())]
    VersionEntryFileNotFound(PathBuf),

    /// Database operation failed.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Applying migrations failed.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The sandbox runtime failed.
    #[error(transparent)]
    Sandbox(#[from] crate::sandbox::SandboxError),

    /// I/O operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code string, used in RPC error responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::VersionAlreadyExists { .. } => "VERSION_ALREADY_EXISTS",
            Self::VersionInUse { .. } => "VERSION_IN_USE",
            Self::VersionNotFound { .. } => "VERSION_NOT_FOUND",
            Self::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Self::VersionFolderNotFound(_) => "VERSION_FOLDER_NOT_FOUND",
            Self::VersionEntryFileNotFound(_) => "VERSION_ENTRY_FILE_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migrate(_) => "MIGRATION_ERROR",
            Self::Sandbox(_) => "SANDBOX_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this is an expected domain condition rather than an
    /// infrastructure fault.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::VersionAlreadyExists { .. }
                | Self::VersionInUse { .. }
                | Self::VersionNotFound { .. }
                | Self::InstanceNotFound(_)
                | Self::VersionFolderNotFound(_)
                | Self::VersionEntryFileNotFound(_)
        )
    }
}

/// Result type using blockhost Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Constraint kind reported by the storage engine, if the error is a
/// constraint violation at all.
pub(crate) fn constraint_kind(err: &sqlx::Error) -> Option<ErrorKind> {
    match err {
        sqlx::Error::Database(db_err) => match db_err.kind() {
            ErrorKind::Other => None,
            kind => Some(kind),
        },
        _ => None,
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(constraint_kind(err), Some(ErrorKind::UniqueViolation))
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(constraint_kind(err), Some(ErrorKind::ForeignKeyViolation))
}

pub(crate) fn is_not_null_violation(err: &sqlx::Error) -> bool {
    matches!(constraint_kind(err), Some(ErrorKind::NotNullViolation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::VersionAlreadyExists {
            name: "weather".to_string(),
            version: "1.0.0".to_string(),
        };
        assert_eq!(err.error_code(), "VERSION_ALREADY_EXISTS");
        assert_eq!(err.to_string(), "Version weather@1.0.0 already exists");
        assert!(err.is_domain());

        let err = Error::InstanceNotFound(42);
        assert_eq!(err.error_code(), "INSTANCE_NOT_FOUND");
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_preflight_errors_display_path() {
        let err = Error::VersionFolderNotFound(PathBuf::from("/blocks/missing"));
        assert!(err.to_string().contains("/blocks/missing"));

        let err = Error::VersionEntryFileNotFound(PathBuf::from("/blocks/x/index.js"));
        assert!(err.to_string().contains("index.js"));
        assert_eq!(err.error_code(), "VERSION_ENTRY_FILE_NOT_FOUND");
    }

    #[test]
    fn test_infrastructure_errors_are_transparent() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "disk gone");
        let err = Error::from(io_err);
        assert_eq!(err.to_string(), "disk gone");
        assert_eq!(err.error_code(), "IO_ERROR");
        assert!(!err.is_domain());

        let err = Error::from(sqlx::migrate::MigrateError::VersionMissing(3));
        assert_eq!(err.error_code(), "MIGRATION_ERROR");
        assert!(!err.is_domain());
    }

    #[test]
    fn test_non_database_error_has_no_constraint_kind() {
        assert!(constraint_kind(&sqlx::Error::RowNotFound).is_none());
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }
}
