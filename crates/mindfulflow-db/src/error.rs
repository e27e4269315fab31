//! Error type for database operations.

use crate::migrations::MigrationError;
use thiserror::Error;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl DbError {
    /// Whether the failure was caused by a table that does not exist.
    pub fn is_missing_relation(&self) -> bool {
        match self {
            DbError::Database(e) => e.to_string().contains("no such table"),
            DbError::Migration(MigrationError::ExecutionFailed { source, .. }) => {
                source.to_string().contains("no such table")
            }
            _ => false,
        }
    }

    /// Whether the failure was a UNIQUE / foreign key / NOT NULL violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DbError::Database(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
