//! In-memory implementations of the repository traits for unit tests
//! (planner, executor, worker loop, recovery loop) that don't need a live
//! Postgres instance.

#![allow(clippy::unwrap_used)]
#![allow(clippy::significant_drop_tightening)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseOperation, DatabaseResult};
use crate::models::{
    Chunk, ChunkStatus, EndpointConfig, ExecutionAttempt, Job, JobStatus, MigrationTable, TableStatus,
    ValidationStatus, WorkerHeartbeatRow, WorkerStatus,
};
use crate::traits::{ChunkRepository, HeartbeatRepository, JobRepository, TableRepository};

type JobMap = Arc<Mutex<HashMap<Uuid, Job>>>;
type TableMap = Arc<Mutex<HashMap<Uuid, MigrationTable>>>;
type ChunkMap = Arc<Mutex<HashMap<Uuid, Chunk>>>;
type AttemptList = Arc<Mutex<Vec<ExecutionAttempt>>>;
type HeartbeatMap = Arc<Mutex<HashMap<String, WorkerHeartbeatRow>>>;

/// In-memory stand-in for `PgMetadataStore`, implementing every repository
/// trait over plain `HashMap`s guarded by `Mutex`.
#[derive(Clone)]
pub struct MockMetadataStore {
    pub jobs: JobMap,
    pub tables: TableMap,
    pub chunks: ChunkMap,
    pub attempts: AttemptList,
    pub heartbeats: HeartbeatMap,

    should_fail_next: Arc<Mutex<bool>>,
    error_message: Arc<Mutex<String>>,
}

impl Default for MockMetadataStore {
    fn default() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            tables: Arc::new(Mutex::new(HashMap::new())),
            chunks: Arc::new(Mutex::new(HashMap::new())),
            attempts: Arc::new(Mutex::new(Vec::new())),
            heartbeats: Arc::new(Mutex::new(HashMap::new())),
            should_fail_next: Arc::new(Mutex::new(false)),
            error_message: Arc::new(Mutex::new("mock error".to_string())),
        }
    }
}

impl MockMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next repository call to return an error.
    pub fn fail_next(&self, message: &str) {
        *self.should_fail_next.lock().unwrap() = true;
        *self.error_message.lock().unwrap() = message.to_string();
    }

    fn check_fail(&self, operation: DatabaseOperation) -> DatabaseResult<()> {
        let mut should_fail = self.should_fail_next.lock().unwrap();
        if *should_fail {
            *should_fail = false;
            let message = self.error_message.lock().unwrap().clone();
            return Err(DatabaseError::from_sqlx(operation, sqlx::Error::Protocol(message), None));
        }
        Ok(())
    }

    fn not_found(operation: DatabaseOperation) -> DatabaseError {
        DatabaseError::NotFound { operation: Box::new(operation), correlation_id: None }
    }
}

#[async_trait]
impl JobRepository for MockMetadataStore {
    async fn create_job(
        &self,
        id: Uuid,
        source_config: &EndpointConfig,
        target_config: &EndpointConfig,
        failure_threshold_percent: f64,
        chunk_target_rows: Option<i64>,
    ) -> DatabaseResult<Job> {
        self.check_fail(DatabaseOperation::CreateJob)?;
        let job = Job {
            id,
            source_config: source_config.clone(),
            target_config: target_config.clone(),
            status: JobStatus::Pending,
            total_tables: 0,
            total_chunks: 0,
            completed_chunks: 0,
            failed_chunks: 0,
            failure_threshold_percent,
            chunk_target_rows,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
            auto_failed_at: None,
        };
        self.jobs.lock().unwrap().insert(id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> DatabaseResult<Job> {
        self.check_fail(DatabaseOperation::GetJob)?;
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::not_found(DatabaseOperation::GetJob))
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> DatabaseResult<Vec<Job>> {
        self.check_fail(DatabaseOperation::ListJobs)?;
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect())
    }

    async fn set_job_status(&self, id: Uuid, status: JobStatus, error: Option<&str>) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpdateJobStatus)?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::UpdateJobStatus))?;
        job.status = status;
        if let Some(e) = error {
            job.last_error = Some(e.to_string());
        }
        Ok(())
    }

    async fn set_job_counts(&self, id: Uuid, total_tables: i32, total_chunks: i32) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpdateJobStatus)?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::UpdateJobStatus))?;
        job.total_tables = total_tables;
        job.total_chunks = total_chunks;
        Ok(())
    }

    async fn increment_job_progress(&self, id: Uuid, completed: bool) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpdateJobStatus)?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::UpdateJobStatus))?;
        if completed {
            job.completed_chunks += 1;
        } else {
            job.failed_chunks += 1;
        }
        Ok(())
    }

    async fn mark_job_started(&self, id: Uuid) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpdateJobStatus)?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::UpdateJobStatus))?;
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_job_completed(&self, id: Uuid) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpdateJobStatus)?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::UpdateJobStatus))?;
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn auto_fail_job(&self, id: Uuid, reason: &str) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpdateJobStatus)?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::UpdateJobStatus))?;
        job.status = JobStatus::Failed;
        job.last_error = Some(reason.to_string());
        job.auto_failed_at = Some(Utc::now());
        Ok(())
    }

    async fn job_failure_percent(&self, id: Uuid) -> DatabaseResult<f64> {
        self.check_fail(DatabaseOperation::Query { description: "job_failure_percent".to_string() })?;
        let jobs = self.jobs.lock().unwrap();
        let job = jobs.get(&id).ok_or_else(|| Self::not_found(DatabaseOperation::GetJob))?;
        Ok(if job.total_chunks == 0 {
            0.0
        } else {
            f64::from(job.failed_chunks) / f64::from(job.total_chunks) * 100.0
        })
    }
}

#[async_trait]
impl TableRepository for MockMetadataStore {
    async fn create_table(
        &self,
        id: Uuid,
        job_id: Uuid,
        table_name: &str,
        primary_key_column: &str,
        total_rows: i64,
        total_chunks: i32,
    ) -> DatabaseResult<MigrationTable> {
        self.check_fail(DatabaseOperation::CreateTable)?;
        let table = MigrationTable {
            id,
            job_id,
            table_name: table_name.to_string(),
            primary_key_column: primary_key_column.to_string(),
            total_rows,
            total_chunks,
            completed_chunks: 0,
            failed_chunks: 0,
            status: TableStatus::Pending,
            started_at: None,
            completed_at: None,
        };
        self.tables.lock().unwrap().insert(id, table.clone());
        Ok(table)
    }

    async fn get_table(&self, id: Uuid) -> DatabaseResult<MigrationTable> {
        self.check_fail(DatabaseOperation::GetTable)?;
        self.tables
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::not_found(DatabaseOperation::GetTable))
    }

    async fn list_tables_for_job(&self, job_id: Uuid) -> DatabaseResult<Vec<MigrationTable>> {
        self.check_fail(DatabaseOperation::GetTable)?;
        Ok(self.tables.lock().unwrap().values().filter(|t| t.job_id == job_id).cloned().collect())
    }

    async fn set_table_status(&self, id: Uuid, status: TableStatus) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpdateTableProgress)?;
        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::UpdateTableProgress))?;
        table.status = status;
        if matches!(status, TableStatus::Completed | TableStatus::Failed) {
            table.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn increment_table_progress(&self, id: Uuid, completed: bool) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpdateTableProgress)?;
        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::UpdateTableProgress))?;
        if completed {
            table.completed_chunks += 1;
        } else {
            table.failed_chunks += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkRepository for MockMetadataStore {
    async fn create_chunk(
        &self,
        id: Uuid,
        job_id: Uuid,
        table_id: Uuid,
        table_name: &str,
        pk_start: i64,
        pk_end: i64,
        max_retries: i32,
    ) -> DatabaseResult<Chunk> {
        self.check_fail(DatabaseOperation::CreateChunk)?;
        let chunk = Chunk {
            id,
            job_id,
            table_id,
            table_name: table_name.to_string(),
            pk_start,
            pk_end,
            status: ChunkStatus::Pending,
            retry_count: 0,
            max_retries,
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
        self.chunks.lock().unwrap().insert(id, chunk.clone());
        Ok(chunk)
    }

    async fn get_chunk(&self, id: Uuid) -> DatabaseResult<Chunk> {
        self.check_fail(DatabaseOperation::GetChunk)?;
        self.chunks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::not_found(DatabaseOperation::GetChunk))
    }

    async fn list_chunks(&self, job_id: Uuid, status: Option<ChunkStatus>) -> DatabaseResult<Vec<Chunk>> {
        self.check_fail(DatabaseOperation::ListChunks)?;
        let mut out: Vec<Chunk> = self
            .chunks
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.job_id == job_id && status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.pk_start);
        Ok(out)
    }

    async fn lease_chunk(&self, job_id: Uuid, worker_id: &str) -> DatabaseResult<Option<Chunk>> {
        self.check_fail(DatabaseOperation::LeaseChunk)?;
        let mut chunks = self.chunks.lock().unwrap();
        let mut candidates: Vec<&mut Chunk> = chunks
            .values_mut()
            .filter(|c| c.job_id == job_id && c.is_lease_eligible())
            .filter(|c| c.next_retry_at.is_none_or(|t| t <= Utc::now()))
            .collect();
        candidates.sort_by_key(|c| c.pk_start);

        if let Some(chunk) = candidates.into_iter().next() {
            chunk.status = ChunkStatus::Running;
            chunk.worker_id = Some(worker_id.to_string());
            chunk.last_heartbeat = Some(Utc::now());
            chunk.started_at = Some(Utc::now());
            return Ok(Some(chunk.clone()));
        }
        Ok(None)
    }

    async fn resume_chunk(&self, id: Uuid) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::ResumeChunk)?;
        let mut chunks = self.chunks.lock().unwrap();
        let chunk = chunks.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::ResumeChunk))?;
        chunk.status = ChunkStatus::Pending;
        chunk.worker_id = None;
        chunk.last_heartbeat = None;
        chunk.next_retry_at = None;
        Ok(())
    }

    async fn record_heartbeat(&self, id: Uuid) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpsertHeartbeat)?;
        let mut chunks = self.chunks.lock().unwrap();
        if let Some(chunk) = chunks.get_mut(&id) {
            if chunk.status == ChunkStatus::Running {
                chunk.last_heartbeat = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn complete_chunk(
        &self,
        id: Uuid,
        rows_processed: i64,
        source_row_count: i64,
        target_row_count: i64,
        duration_ms: i64,
    ) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::CompleteChunk)?;
        let mut chunks = self.chunks.lock().unwrap();
        let chunk = chunks.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::CompleteChunk))?;
        chunk.status = ChunkStatus::Completed;
        chunk.rows_processed = Some(rows_processed);
        chunk.source_row_count = Some(source_row_count);
        chunk.target_row_count = Some(target_row_count);
        chunk.validation_status = Some(if source_row_count == target_row_count {
            ValidationStatus::Validated
        } else {
            ValidationStatus::Mismatched
        });
        chunk.duration_ms = Some(duration_ms);
        chunk.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail_chunk(&self, id: Uuid, error: &str, next_retry_at: Option<DateTime<Utc>>) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::FailChunk)?;
        let mut chunks = self.chunks.lock().unwrap();
        let chunk = chunks.get_mut(&id).ok_or_else(|| Self::not_found(DatabaseOperation::FailChunk))?;
        chunk.status = ChunkStatus::Failed;
        chunk.retry_count += 1;
        chunk.last_error = Some(error.to_string());
        chunk.next_retry_at = next_retry_at;
        chunk.worker_id = None;
        Ok(())
    }

    async fn find_stale_chunks(&self, stale_before: DateTime<Utc>) -> DatabaseResult<Vec<Chunk>> {
        self.check_fail(DatabaseOperation::FindStaleChunks)?;
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.status == ChunkStatus::Running && c.last_heartbeat.is_some_and(|h| h < stale_before))
            .cloned()
            .collect())
    }

    async fn append_execution_attempt(&self, attempt: &ExecutionAttempt) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::AppendExecutionAttempt)?;
        self.attempts.lock().unwrap().push(attempt.clone());
        Ok(())
    }
}

#[async_trait]
impl HeartbeatRepository for MockMetadataStore {
    async fn upsert_heartbeat(&self, worker_id: &str, current_chunk: Option<Uuid>) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpsertHeartbeat)?;
        self.heartbeats.lock().unwrap().insert(
            worker_id.to_string(),
            WorkerHeartbeatRow {
                worker_id: worker_id.to_string(),
                last_seen: Utc::now(),
                current_chunk,
                status: WorkerStatus::Active,
            },
        );
        Ok(())
    }

    async fn mark_worker_inactive(&self, worker_id: &str) -> DatabaseResult<()> {
        self.check_fail(DatabaseOperation::UpsertHeartbeat)?;
        if let Some(hb) = self.heartbeats.lock().unwrap().get_mut(worker_id) {
            hb.status = WorkerStatus::Inactive;
        }
        Ok(())
    }

    async fn get_heartbeat(&self, worker_id: &str) -> DatabaseResult<Option<WorkerHeartbeatRow>> {
        self.check_fail(DatabaseOperation::Query { description: "get_heartbeat".to_string() })?;
        Ok(self.heartbeats.lock().unwrap().get(worker_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointConfig {
        EndpointConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "db".to_string(),
            username: "user".to_string(),
            password: String::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_job() {
        let store = MockMetadataStore::new();
        let id = Uuid::new_v4();
        store.create_job(id, &endpoint(), &endpoint(), 50.0, None).await.unwrap();
        let job = store.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_lease_chunk_skips_ineligible() {
        let store = MockMetadataStore::new();
        let job_id = Uuid::new_v4();
        let table_id = Uuid::new_v4();
        let c1 = store.create_chunk(Uuid::new_v4(), job_id, table_id, "t", 0, 99, 3).await.unwrap();
        store.complete_chunk(c1.id, 100, 100, 100, 10).await.unwrap();
        let c2 = store.create_chunk(Uuid::new_v4(), job_id, table_id, "t", 100, 199, 3).await.unwrap();

        let leased = store.lease_chunk(job_id, "worker-1").await.unwrap().unwrap();
        assert_eq!(leased.id, c2.id);
        assert_eq!(leased.status, ChunkStatus::Running);

        assert!(store.lease_chunk(job_id, "worker-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_next_injects_error() {
        let store = MockMetadataStore::new();
        store.fail_next("boom");
        let err = store.get_job(Uuid::new_v4()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
