//! Database errors

use thiserror::Error;

/// Database errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Record not found
    #[error("record not found")]
    NotFound,

    /// Natural key already used by another record
    #[error("{entity} key already exists: {key}")]
    Conflict {
        /// Entity kind
        entity: &'static str,
        /// Natural key
        key: String,
    },

    /// Stored row changed since it was read
    #[error("{entity} {id} was modified concurrently")]
    VersionConflict {
        /// Entity kind
        entity: &'static str,
        /// Record id
        id: String,
    },

    /// Backend unavailable or failed
    #[error("storage error: {0}")]
    Storage(String),
}

impl DbError {
    /// Whether retrying from a fresh read may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::Storage(_))
    }
}

/// Result alias for repository calls
pub type DbResult<T> = Result<T, DbError>;
