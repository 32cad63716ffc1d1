//! Core service errors

use tariff_db::DbError;
use tariff_types::{DomainError, ValidationError};
use thiserror::Error;

/// Errors returned by the core services
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Malformed input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Referenced record does not exist
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Key or id that was looked up
        key: String,
    },

    /// Natural key already taken
    #[error("{entity} already exists: {key}")]
    Conflict {
        /// Entity kind
        entity: &'static str,
        /// Natural key
        key: String,
    },

    /// Business-rule violation
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Repository failure
    #[error("database error: {0}")]
    Database(DbError),
}

impl CoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Database(DbError::NotFound))
    }

    /// Whether the operation may succeed when retried from a fresh read
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(err) if err.is_retryable())
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Domain(_) => "DOMAIN_ERROR",
            Self::Database(DbError::VersionConflict { .. }) => "CONCURRENT_MODIFICATION",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict { entity, key } => Self::Conflict { entity, key },
            DbError::Storage(_) => {
                tracing::error!(error = %err, "database error");
                Self::Database(err)
            }
            err => Self::Database(err),
        }
    }
}

/// Result alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;
