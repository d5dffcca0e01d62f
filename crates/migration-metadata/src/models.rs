//! Domain models for the metadata store's entities (SPEC_FULL.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a migration job: `pending -> planning -> running ->
/// {completed, failed, paused}`; `paused -> running` is the only revival.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Planning,
    Running,
    Completed,
    Failed,
    Paused,
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "planning" => Ok(Self::Planning),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("invalid job status: {s}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Self::Pending)
    }
}

/// Lifecycle of a table row: `pending -> running -> {completed, failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::str::FromStr for TableStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid table status: {s}")),
        }
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a chunk: `pending -> running -> {completed, failed}`;
/// `failed -> pending` is the only revival (resume); `completed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::str::FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid chunk status: {s}")),
        }
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl ChunkStatus {
    /// True if a chunk in this status is eligible for lease acquisition
    /// (SPEC_FULL.md §4.4 phase 1: `pending` or `failed` with retries left
    /// is checked by the caller against `retry_count`/`max_retries`).
    #[must_use]
    pub const fn is_pending_or_failed(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// Post-copy row-count validation outcome for a chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Validated,
    Mismatched,
}

impl std::str::FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "validated" => Ok(Self::Validated),
            "mismatched" => Ok(Self::Mismatched),
            _ => Err(format!("invalid validation status: {s}")),
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Mismatched => "mismatched",
        };
        write!(f, "{s}")
    }
}

/// Presence status recorded in a `WorkerHeartbeat` row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        };
        write!(f, "{s}")
    }
}

/// An endpoint descriptor: enough to open a connection to a source or target
/// database. The engine treats driver internals as an external collaborator
/// (SPEC_FULL.md §1), so this is intentionally a thin, serializable record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// One migration request (SPEC_FULL.md §3 "Job").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source_config: EndpointConfig,
    pub target_config: EndpointConfig,
    pub status: JobStatus,
    pub total_tables: i32,
    pub total_chunks: i32,
    pub completed_chunks: i32,
    pub failed_chunks: i32,
    pub failure_threshold_percent: f64,
    pub chunk_target_rows: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub auto_failed_at: Option<DateTime<Utc>>,
}

/// One source table inside a job (SPEC_FULL.md §3 "Table").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationTable {
    pub id: Uuid,
    pub job_id: Uuid,
    pub table_name: String,
    pub primary_key_column: String,
    pub total_rows: i64,
    pub total_chunks: i32,
    pub completed_chunks: i32,
    pub failed_chunks: i32,
    pub status: TableStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The unit of work: a contiguous PK range within one table
/// (SPEC_FULL.md §3 "Chunk", the central entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub job_id: Uuid,
    pub table_id: Uuid,
    pub table_name: String,
    pub pk_start: i64,
    pub pk_end: i64,
    pub status: ChunkStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub worker_id: Option<String>,
    pub rows_processed: Option<i64>,
    pub source_row_count: Option<i64>,
    pub target_row_count: Option<i64>,
    pub validation_status: Option<ValidationStatus>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl Chunk {
    /// Whether this chunk may currently be leased (SPEC_FULL.md §4.4 phase 1).
    #[must_use]
    pub const fn is_lease_eligible(&self) -> bool {
        match self.status {
            ChunkStatus::Pending => true,
            ChunkStatus::Failed => self.retry_count < self.max_retries,
            ChunkStatus::Running | ChunkStatus::Completed => false,
        }
    }
}

/// Append-only audit row per executor invocation (SPEC_FULL.md §3 "ExecutionAttempt").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub id: Uuid,
    pub chunk_id: Uuid,
    pub attempt_number: i32,
    pub worker_id: String,
    pub status: ChunkStatus,
    pub rows_processed: Option<i64>,
    pub source_row_count: Option<i64>,
    pub target_row_count: Option<i64>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Worker presence record (SPEC_FULL.md §3 "WorkerHeartbeat").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatRow {
    pub worker_id: String,
    pub last_seen: DateTime<Utc>,
    pub current_chunk: Option<Uuid>,
    pub status: WorkerStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrip() {
        for s in [
            JobStatus::Pending,
            JobStatus::Planning,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Paused,
        ] {
            let parsed: JobStatus = s.to_string().parse().unwrap();
            assert_eq!(s, parsed);
        }
    }

    #[test]
    fn test_chunk_lease_eligibility() {
        let base = Chunk {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            table_name: "orders".to_string(),
            pk_start: 1,
            pk_end: 100,
            status: ChunkStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            worker_id: None,
            rows_processed: None,
            source_row_count: None,
            target_row_count: None,
            validation_status: None,
            last_heartbeat: None,
            next_retry_at: None,
            last_error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        };
        assert!(base.is_lease_eligible());

        let running = Chunk { status: ChunkStatus::Running, ..base.clone() };
        assert!(!running.is_lease_eligible());

        let failed_with_retries = Chunk {
            status: ChunkStatus::Failed,
            retry_count: 1,
            ..base.clone()
        };
        assert!(failed_with_retries.is_lease_eligible());

        let failed_exhausted = Chunk {
            status: ChunkStatus::Failed,
            retry_count: 3,
            max_retries: 3,
            ..base
        };
        assert!(!failed_exhausted.is_lease_eligible());
    }
}
