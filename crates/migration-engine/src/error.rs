//! Engine-level error taxonomy (SPEC_FULL.md §7). Mirrors the shape of
//! `migration_metadata::DatabaseError`: one crate-level `thiserror` enum,
//! tagged with the operation that failed, wrapping the underlying driver
//! error via `#[source]`. Executors never let these escape as uncaught
//! panics — every variant is caught at the executor's single join point
//! and translated into a chunk status write.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Timeout or network failure reading the source. Retried.
    #[error("transient source error during {operation}: {message}")]
    TransientSourceError {
        operation: String,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// Timeout, deadlock, or connection loss writing the target. Retried.
    #[error("transient target error during {operation}: {message}")]
    TransientTargetError {
        operation: String,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// Post-copy count equality failed.
    #[error("validation mismatch for chunk {chunk_id}: source={source_count} target={target_count}")]
    ValidationMismatchError { chunk_id: uuid::Uuid, source_count: i64, target_count: i64 },

    /// Constraint violation or other data-shape error. Retried once;
    /// repeated occurrence fails the chunk permanently.
    #[error("permanent data error during {operation}: {message}")]
    PermanentDataError {
        operation: String,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// Failure to persist chunk/job/table state. The target transaction
    /// was never touched or has already been rolled back.
    #[error("metadata store error: {0}")]
    MetadataStoreError(#[from] migration_metadata::DatabaseError),

    /// Attempted to commit after the lease was revoked by the recovery loop.
    #[error("lease lost for chunk {chunk_id}")]
    LeaseLostError { chunk_id: uuid::Uuid },

    /// The planner rejected a table (no PK, non-integer PK, introspection failure).
    #[error("planner error for table {table}: {message}")]
    PlannerError { table: String, message: String },

    /// The table has no eligible primary key (SPEC_FULL.md §4.1 step 1).
    #[error("table {table} has no usable single-column primary key")]
    NoPrimaryKey { table: String },
}

impl EngineError {
    /// Classify a raw source-side `sqlx::Error`, analogous to
    /// `DatabaseError::from_sqlx` for the metadata store's own operations.
    #[must_use]
    pub fn from_source_sqlx(operation: &str, source: sqlx::Error) -> Self {
        classify(operation, source, true)
    }

    /// Classify a raw target-side `sqlx::Error`.
    #[must_use]
    pub fn from_target_sqlx(operation: &str, source: sqlx::Error) -> Self {
        classify(operation, source, false)
    }

    /// True for error kinds the executor should retry (SPEC_FULL.md §7).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientSourceError { .. }
                | Self::TransientTargetError { .. }
                | Self::ValidationMismatchError { .. }
                | Self::PermanentDataError { .. }
        )
    }
}

fn classify(operation: &str, source: sqlx::Error, is_source_side: bool) -> EngineError {
    if let sqlx::Error::Database(ref db_err) = source {
        if db_err.constraint().is_some() {
            return EngineError::PermanentDataError {
                operation: operation.to_string(),
                message: source.to_string(),
                source: Some(source),
            };
        }
    }

    let message = source.to_string();
    let transient = message.contains("timeout")
        || message.contains("timed out")
        || message.contains("connection")
        || matches!(source, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_));

    if transient {
        return if is_source_side {
            EngineError::TransientSourceError { operation: operation.to_string(), message, source: Some(source) }
        } else {
            EngineError::TransientTargetError { operation: operation.to_string(), message, source: Some(source) }
        };
    }

    EngineError::PermanentDataError { operation: operation.to_string(), message, source: Some(source) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_mismatch_is_retryable() {
        let err = EngineError::ValidationMismatchError { chunk_id: uuid::Uuid::new_v4(), source_count: 5, target_count: 4 };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_lease_lost_is_not_retryable() {
        let err = EngineError::LeaseLostError { chunk_id: uuid::Uuid::new_v4() };
        assert!(!err.is_retryable());
    }
}
