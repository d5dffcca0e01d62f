//! Layered, operation-tagged error taxonomy for the metadata store.

use thiserror::Error;

/// Result alias for metadata-store operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Names the metadata-store operation a failure occurred in, so a single
/// `DatabaseError::QueryFailed` doesn't have to carry an ad-hoc string.
#[derive(Debug, Clone)]
pub enum DatabaseOperation {
    CreateJob,
    GetJob,
    ListJobs,
    UpdateJobStatus,
    CreateTable,
    GetTable,
    UpdateTableProgress,
    CreateChunk,
    GetChunk,
    ListChunks,
    LeaseChunk,
    CompleteChunk,
    FailChunk,
    ResumeChunk,
    AppendExecutionAttempt,
    UpsertHeartbeat,
    FindStaleChunks,
    FindOrphanChunks,
    FindCircuitBreakerJobs,
    Migration { version: String },
    Query { description: String },
}

impl std::fmt::Display for DatabaseOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateJob => write!(f, "create_job"),
            Self::GetJob => write!(f, "get_job"),
            Self::ListJobs => write!(f, "list_jobs"),
            Self::UpdateJobStatus => write!(f, "update_job_status"),
            Self::CreateTable => write!(f, "create_table"),
            Self::GetTable => write!(f, "get_table"),
            Self::UpdateTableProgress => write!(f, "update_table_progress"),
            Self::CreateChunk => write!(f, "create_chunk"),
            Self::GetChunk => write!(f, "get_chunk"),
            Self::ListChunks => write!(f, "list_chunks"),
            Self::LeaseChunk => write!(f, "lease_chunk"),
            Self::CompleteChunk => write!(f, "complete_chunk"),
            Self::FailChunk => write!(f, "fail_chunk"),
            Self::ResumeChunk => write!(f, "resume_chunk"),
            Self::AppendExecutionAttempt => write!(f, "append_execution_attempt"),
            Self::UpsertHeartbeat => write!(f, "upsert_heartbeat"),
            Self::FindStaleChunks => write!(f, "find_stale_chunks"),
            Self::FindOrphanChunks => write!(f, "find_orphan_chunks"),
            Self::FindCircuitBreakerJobs => write!(f, "find_circuit_breaker_jobs"),
            Self::Migration { version } => write!(f, "migration({version})"),
            Self::Query { description } => write!(f, "query({description})"),
        }
    }
}

/// Errors raised by the metadata store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("connection pool exhausted (max {max_connections} connections, timeout {timeout_secs}s) [correlation_id={correlation_id:?}]")]
    ConnectionPoolExhausted {
        max_connections: u32,
        timeout_secs: u64,
        correlation_id: Option<String>,
    },

    #[error("failed to connect to metadata store: {message} [correlation_id={correlation_id:?}]")]
    ConnectionFailed {
        message: String,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    #[error("query timed out: {operation} (timeout {timeout_secs}s) [correlation_id={correlation_id:?}]")]
    QueryTimeout {
        operation: Box<DatabaseOperation>,
        timeout_secs: u64,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    #[error("query failed: {operation}: {message} [correlation_id={correlation_id:?}]")]
    QueryFailed {
        operation: Box<DatabaseOperation>,
        message: String,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    #[error("constraint violation on {table}.{constraint} during {operation} [correlation_id={correlation_id:?}]")]
    ConstraintViolation {
        table: String,
        constraint: String,
        operation: Box<DatabaseOperation>,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    #[error("row not found for {operation} [correlation_id={correlation_id:?}]")]
    NotFound {
        operation: Box<DatabaseOperation>,
        correlation_id: Option<String>,
    },

    #[error("data integrity error during {operation}: {message} [correlation_id={correlation_id:?}]")]
    DataIntegrityError {
        operation: Box<DatabaseOperation>,
        message: String,
        correlation_id: Option<String>,
    },

    #[error("migration {version} failed: {message}")]
    MigrationFailed {
        version: String,
        message: String,
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    #[error("configuration error: {message}")]
    ConfigurationError { message: String },
}

impl DatabaseError {
    /// Classify a raw `sqlx::Error` into the tagged taxonomy, routing
    /// through constraint-violation / timeout detection the way the
    /// metadata store's own query boundary does for every call site.
    #[must_use]
    pub fn from_sqlx(operation: DatabaseOperation, source: sqlx::Error, correlation_id: Option<String>) -> Self {
        if let sqlx::Error::Database(ref db_err) = source {
            if let Some(constraint) = db_err.constraint() {
                let table = constraint.split('_').next().unwrap_or(constraint).to_string();
                return Self::ConstraintViolation {
                    table,
                    constraint: constraint.to_string(),
                    operation: Box::new(operation),
                    correlation_id,
                    source,
                };
            }
        }

        let message = source.to_string();
        if message.contains("timeout") || message.contains("timed out") {
            return Self::QueryTimeout {
                operation: Box::new(operation),
                timeout_secs: 0,
                correlation_id,
                source,
            };
        }

        Self::QueryFailed {
            operation: Box::new(operation),
            message,
            correlation_id,
            source,
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::ConnectionPoolExhausted { correlation_id, .. }
            | Self::ConnectionFailed { correlation_id, .. }
            | Self::QueryTimeout { correlation_id, .. }
            | Self::QueryFailed { correlation_id, .. }
            | Self::ConstraintViolation { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::DataIntegrityError { correlation_id, .. } => correlation_id.as_deref(),
            Self::MigrationFailed { .. } | Self::ConfigurationError { .. } => None,
        }
    }
}

/// Extension trait converting a raw `sqlx::Error` into a tagged `DatabaseError`
/// at the point of the query, mirroring the teacher's `DatabaseErrorExt`.
pub trait DatabaseErrorExt<T> {
    /// # Errors
    /// Propagates the original failure wrapped as a `DatabaseError`.
    fn map_db_err(self, operation: DatabaseOperation, correlation_id: Option<String>) -> DatabaseResult<T>;
}

impl<T> DatabaseErrorExt<T> for Result<T, sqlx::Error> {
    fn map_db_err(self, operation: DatabaseOperation, correlation_id: Option<String>) -> DatabaseResult<T> {
        self.map_err(|e| DatabaseError::from_sqlx(operation, e, correlation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_display() {
        assert_eq!(DatabaseOperation::LeaseChunk.to_string(), "lease_chunk");
        assert_eq!(
            DatabaseOperation::Migration { version: "0001".to_string() }.to_string(),
            "migration(0001)"
        );
    }

    #[test]
    fn test_correlation_id_accessor() {
        let err = DatabaseError::ConnectionPoolExhausted {
            max_connections: 10,
            timeout_secs: 5,
            correlation_id: Some("abc".to_string()),
        };
        assert_eq!(err.correlation_id(), Some("abc"));

        let err = DatabaseError::ConfigurationError { message: "bad".to_string() };
        assert_eq!(err.correlation_id(), None);
    }
}
