//! Reconciliation errors

use thiserror::Error;

use tariff_core::CoreError;
use tariff_db::DbError;

/// Reconciliation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BillingError {
    /// Core service error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// Envelope or payload could not be decoded
    #[error("payload error: {0}")]
    Payload(String),

    /// Concurrent writers kept winning the optimistic version check
    #[error("gave up on {aggregate} after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        /// Aggregate being updated, e.g. the provider subscription id
        aggregate: String,
        /// Attempts made
        attempts: u32,
    },
}

impl BillingError {
    /// Whether redelivering the event may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Core(e) => e.is_retryable(),
            Self::Database(e) => e.is_retryable(),
            Self::Payload(_) => false,
            Self::ConflictRetriesExhausted { .. } => true,
        }
    }

    pub(crate) fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            Self::Database(DbError::VersionConflict { .. })
                | Self::Core(CoreError::Database(DbError::VersionConflict { .. }))
        )
    }

    /// Get error code for logging and metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.error_code(),
            Self::Database(DbError::VersionConflict { .. }) => "CONCURRENT_MODIFICATION",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Payload(_) => "PAYLOAD_ERROR",
            Self::ConflictRetriesExhausted { .. } => "CONFLICT_RETRIES_EXHAUSTED",
        }
    }
}
