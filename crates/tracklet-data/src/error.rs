//! Error types for the state store.

use thiserror::Error;
use tracklet_core::ErrorKind;

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, DataError>;

/// Failures surfaced by the state store.
#[derive(Debug, Error)]
pub enum DataError {
    /// The underlying database operation failed.
    #[error("database failure during {operation}")]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },
    /// Startup migration failed.
    #[error("migration failure")]
    Migration {
        /// Underlying migrate error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },
    /// The requested entity does not exist.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity label.
        entity: &'static str,
        /// Key that missed.
        key: String,
    },
    /// A repository invariant would be violated by the operation.
    #[error("constraint violated: {message}")]
    Constraint {
        /// Violation description.
        message: String,
    },
    /// A stored value could not be interpreted.
    #[error("corrupt value in column {column}: {value}")]
    Corrupt {
        /// Column name.
        column: &'static str,
        /// Offending value.
        value: String,
    },
}

impl DataError {
    /// Stable kind discriminator for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Database { .. } | Self::Migration { .. } => ErrorKind::Network,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Constraint { .. } | Self::Corrupt { .. } => ErrorKind::Invariant,
        }
    }

    /// Wrap a driver error, promoting unique-key violations to
    /// [`DataError::Constraint`] so callers can tell invariant breaches from
    /// plumbing failures.
    pub(crate) fn db(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| {
            if let sqlx::Error::Database(ref db_err) = source {
                if db_err.is_unique_violation() {
                    return Self::Constraint {
                        message: format!("{operation}: {}", db_err.message()),
                    };
                }
            }
            Self::Database { operation, source }
        }
    }
}
