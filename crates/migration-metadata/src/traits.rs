//! Repository traits the rest of the engine depends on. Production code
//! talks to `Arc<dyn ChunkRepository>` etc. so planner, executor, worker
//! loop and recovery loop can be tested against in-memory mocks
//! (SPEC_FULL.md §2.1 test tooling) without a live Postgres instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseResult;
use crate::models::{Chunk, EndpointConfig, ExecutionAttempt, Job, JobStatus, MigrationTable, TableStatus, WorkerHeartbeatRow};

/// CRUD + status transitions for `Job` rows.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(
        &self,
        id: Uuid,
        source_config: &EndpointConfig,
        target_config: &EndpointConfig,
        failure_threshold_percent: f64,
        chunk_target_rows: Option<i64>,
    ) -> DatabaseResult<Job>;

    async fn get_job(&self, id: Uuid) -> DatabaseResult<Job>;

    async fn list_jobs(&self, status: Option<JobStatus>) -> DatabaseResult<Vec<Job>>;

    async fn set_job_status(&self, id: Uuid, status: JobStatus, error: Option<&str>) -> DatabaseResult<()>;

    async fn set_job_counts(&self, id: Uuid, total_tables: i32, total_chunks: i32) -> DatabaseResult<()>;

    /// Bump `completed_chunks` or `failed_chunks` by one, mirroring the
    /// table-level `increment_table_progress` (SPEC_FULL.md §4.6).
    async fn increment_job_progress(&self, id: Uuid, completed: bool) -> DatabaseResult<()>;

    async fn mark_job_started(&self, id: Uuid) -> DatabaseResult<()>;

    async fn mark_job_completed(&self, id: Uuid) -> DatabaseResult<()>;

    /// Auto-fail a job whose failure rate crossed `failure_threshold_percent`
    /// (SPEC_FULL.md §4.7), recording `auto_failed_at` for the audit trail.
    async fn auto_fail_job(&self, id: Uuid, reason: &str) -> DatabaseResult<()>;

    async fn job_failure_percent(&self, id: Uuid) -> DatabaseResult<f64>;
}

/// CRUD + progress bookkeeping for `MigrationTable` rows.
#[async_trait]
pub trait TableRepository: Send + Sync {
    async fn create_table(
        &self,
        id: Uuid,
        job_id: Uuid,
        table_name: &str,
        primary_key_column: &str,
        total_rows: i64,
        total_chunks: i32,
    ) -> DatabaseResult<MigrationTable>;

    async fn get_table(&self, id: Uuid) -> DatabaseResult<MigrationTable>;

    async fn list_tables_for_job(&self, job_id: Uuid) -> DatabaseResult<Vec<MigrationTable>>;

    async fn set_table_status(&self, id: Uuid, status: TableStatus) -> DatabaseResult<()>;

    async fn increment_table_progress(&self, id: Uuid, completed: bool) -> DatabaseResult<()>;
}

/// CRUD, leasing, and terminal-state recording for `Chunk` rows. This is the
/// hottest path in the engine: every chunk passes through `lease_chunk` once
/// and `complete_chunk`/`fail_chunk` exactly once per attempt.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    async fn create_chunk(
        &self,
        id: Uuid,
        job_id: Uuid,
        table_id: Uuid,
        table_name: &str,
        pk_start: i64,
        pk_end: i64,
        max_retries: i32,
    ) -> DatabaseResult<Chunk>;

    async fn get_chunk(&self, id: Uuid) -> DatabaseResult<Chunk>;

    async fn list_chunks(&self, job_id: Uuid, status: Option<crate::models::ChunkStatus>) -> DatabaseResult<Vec<Chunk>>;

    /// Atomically claim one lease-eligible chunk for `worker_id` under
    /// `SELECT ... FOR UPDATE SKIP LOCKED`, returning `Ok(None)` rather than
    /// blocking when no chunk is currently available (SPEC_FULL.md §4.3).
    async fn lease_chunk(&self, job_id: Uuid, worker_id: &str) -> DatabaseResult<Option<Chunk>>;

    /// Reclaim a specific chunk (orphan rescue or manual resume), clearing
    /// its lease fields and returning it to `pending`.
    async fn resume_chunk(&self, id: Uuid) -> DatabaseResult<()>;

    async fn record_heartbeat(&self, id: Uuid) -> DatabaseResult<()>;

    async fn complete_chunk(
        &self,
        id: Uuid,
        rows_processed: i64,
        source_row_count: i64,
        target_row_count: i64,
        duration_ms: i64,
    ) -> DatabaseResult<()>;

    async fn fail_chunk(&self, id: Uuid, error: &str, next_retry_at: Option<DateTime<Utc>>) -> DatabaseResult<()>;

    /// Chunks whose `last_heartbeat` is older than `stale_before`, i.e. the
    /// worker holding the lease has gone quiet (SPEC_FULL.md §4.5).
    async fn find_stale_chunks(&self, stale_before: DateTime<Utc>) -> DatabaseResult<Vec<Chunk>>;

    async fn append_execution_attempt(&self, attempt: &ExecutionAttempt) -> DatabaseResult<()>;
}

/// Worker presence tracking, consulted by the recovery loop to decide
/// whether a stale chunk's worker has actually disappeared.
#[async_trait]
pub trait HeartbeatRepository: Send + Sync {
    async fn upsert_heartbeat(&self, worker_id: &str, current_chunk: Option<Uuid>) -> DatabaseResult<()>;

    async fn mark_worker_inactive(&self, worker_id: &str) -> DatabaseResult<()>;

    async fn get_heartbeat(&self, worker_id: &str) -> DatabaseResult<Option<WorkerHeartbeatRow>>;
}
