//! Postgres-backed implementations of the repository traits, split across
//! the write/read pools the way the teacher splits its own repository
//! layer for resource isolation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
use crate::models::{
    Chunk, ChunkStatus, EndpointConfig, ExecutionAttempt, Job, JobStatus, MigrationTable, TableStatus,
    ValidationStatus, WorkerHeartbeatRow, WorkerStatus,
};
use crate::pool::PoolManager;
use crate::traits::{ChunkRepository, HeartbeatRepository, JobRepository, TableRepository};

/// Shared Postgres-backed repository implementing all four repository
/// traits over one `PoolManager`. Production code depends on the traits,
/// not this type, so swapping in `mock::MockMetadataStore` for tests is
/// a one-line change at the construction site.
pub struct PgMetadataStore {
    pools: PoolManager,
}

impl PgMetadataStore {
    #[must_use]
    pub const fn new(pools: PoolManager) -> Self {
        Self { pools }
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> DatabaseResult<Job> {
    let source_config: serde_json::Value = row.try_get("source_config").map_err(|e| {
        DatabaseError::from_sqlx(DatabaseOperation::GetJob, e, None)
    })?;
    let target_config: serde_json::Value = row.try_get("target_config").map_err(|e| {
        DatabaseError::from_sqlx(DatabaseOperation::GetJob, e, None)
    })?;
    let status: String = row.get("status");

    Ok(Job {
        id: row.get("id"),
        source_config: serde_json::from_value(source_config).map_err(|e| DatabaseError::DataIntegrityError {
            operation: Box::new(DatabaseOperation::GetJob),
            message: format!("malformed source_config: {e}"),
            correlation_id: None,
        })?,
        target_config: serde_json::from_value(target_config).map_err(|e| DatabaseError::DataIntegrityError {
            operation: Box::new(DatabaseOperation::GetJob),
            message: format!("malformed target_config: {e}"),
            correlation_id: None,
        })?,
        status: status.parse().map_err(|e: String| DatabaseError::DataIntegrityError {
            operation: Box::new(DatabaseOperation::GetJob),
            message: e,
            correlation_id: None,
        })?,
        total_tables: row.get("total_tables"),
        total_chunks: row.get("total_chunks"),
        completed_chunks: row.get("completed_chunks"),
        failed_chunks: row.get("failed_chunks"),
        failure_threshold_percent: row.get("failure_threshold_percent"),
        chunk_target_rows: row.get("chunk_target_rows"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        last_error: row.get("last_error"),
        auto_failed_at: row.get("auto_failed_at"),
    })
}

fn table_from_row(row: &sqlx::postgres::PgRow) -> DatabaseResult<MigrationTable> {
    let status: String = row.get("status");
    Ok(MigrationTable {
        id: row.get("id"),
        job_id: row.get("job_id"),
        table_name: row.get("table_name"),
        primary_key_column: row.get("primary_key_column"),
        total_rows: row.get("total_rows"),
        total_chunks: row.get("total_chunks"),
        completed_chunks: row.get("completed_chunks"),
        failed_chunks: row.get("failed_chunks"),
        status: status.parse().map_err(|e: String| DatabaseError::DataIntegrityError {
            operation: Box::new(DatabaseOperation::GetTable),
            message: e,
            correlation_id: None,
        })?,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn chunk_from_row(row: &sqlx::postgres::PgRow) -> DatabaseResult<Chunk> {
    let status: String = row.get("status");
    let validation_status: Option<String> = row.get("validation_status");

    Ok(Chunk {
        id: row.get("id"),
        job_id: row.get("job_id"),
        table_id: row.get("table_id"),
        table_name: row.get("table_name"),
        pk_start: row.get("pk_start"),
        pk_end: row.get("pk_end"),
        status: status.parse().map_err(|e: String| DatabaseError::DataIntegrityError {
            operation: Box::new(DatabaseOperation::GetChunk),
            message: e,
            correlation_id: None,
        })?,
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        worker_id: row.get("worker_id"),
        rows_processed: row.get("rows_processed"),
        source_row_count: row.get("source_row_count"),
        target_row_count: row.get("target_row_count"),
        validation_status: validation_status
            .map(|v| v.parse())
            .transpose()
            .map_err(|e: String| DatabaseError::DataIntegrityError {
                operation: Box::new(DatabaseOperation::GetChunk),
                message: e,
                correlation_id: None,
            })?,
        last_heartbeat: row.get("last_heartbeat"),
        next_retry_at: row.get("next_retry_at"),
        last_error: row.get("last_error"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        duration_ms: row.get("duration_ms"),
    })
}

#[async_trait]
impl JobRepository for PgMetadataStore {
    async fn create_job(
        &self,
        id: Uuid,
        source_config: &EndpointConfig,
        target_config: &EndpointConfig,
        failure_threshold_percent: f64,
        chunk_target_rows: Option<i64>,
    ) -> DatabaseResult<Job> {
        let source_json = serde_json::to_value(source_config).map_err(|e| DatabaseError::DataIntegrityError {
            operation: Box::new(DatabaseOperation::CreateJob),
            message: e.to_string(),
            correlation_id: None,
        })?;
        let target_json = serde_json::to_value(target_config).map_err(|e| DatabaseError::DataIntegrityError {
            operation: Box::new(DatabaseOperation::CreateJob),
            message: e.to_string(),
            correlation_id: None,
        })?;

        let row = sqlx::query(
            r"
            INSERT INTO jobs (id, source_config, target_config, status, failure_threshold_percent, chunk_target_rows)
            VALUES ($1, $2, $3, 'pending', $4, $5)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(source_json)
        .bind(target_json)
        .bind(failure_threshold_percent)
        .bind(chunk_target_rows)
        .fetch_one(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::CreateJob, None)?;

        job_from_row(&row)
    }

    async fn get_job(&self, id: Uuid) -> DatabaseResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pools.read())
            .await
            .map_db_err(DatabaseOperation::GetJob, None)?
            .ok_or_else(|| DatabaseError::NotFound {
                operation: Box::new(DatabaseOperation::GetJob),
                correlation_id: None,
            })?;

        job_from_row(&row)
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> DatabaseResult<Vec<Job>> {
        let rows = match status {
            Some(s) => sqlx::query("SELECT * FROM jobs WHERE status = $1 ORDER BY created_at DESC")
                .bind(s.to_string())
                .fetch_all(self.pools.read())
                .await,
            None => sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC")
                .fetch_all(self.pools.read())
                .await,
        }
        .map_db_err(DatabaseOperation::ListJobs, None)?;

        rows.iter().map(job_from_row).collect()
    }

    async fn set_job_status(&self, id: Uuid, status: JobStatus, error: Option<&str>) -> DatabaseResult<()> {
        sqlx::query("UPDATE jobs SET status = $1, last_error = COALESCE($2, last_error) WHERE id = $3")
            .bind(status.to_string())
            .bind(error)
            .bind(id)
            .execute(self.pools.write())
            .await
            .map_db_err(DatabaseOperation::UpdateJobStatus, None)?;
        Ok(())
    }

    async fn set_job_counts(&self, id: Uuid, total_tables: i32, total_chunks: i32) -> DatabaseResult<()> {
        sqlx::query("UPDATE jobs SET total_tables = $1, total_chunks = $2 WHERE id = $3")
            .bind(total_tables)
            .bind(total_chunks)
            .bind(id)
            .execute(self.pools.write())
            .await
            .map_db_err(DatabaseOperation::UpdateJobStatus, None)?;
        Ok(())
    }

    async fn increment_job_progress(&self, id: Uuid, completed: bool) -> DatabaseResult<()> {
        let column = if completed { "completed_chunks" } else { "failed_chunks" };
        let query = format!("UPDATE jobs SET {column} = {column} + 1 WHERE id = $1");
        sqlx::query(&query)
            .bind(id)
            .execute(self.pools.write())
            .await
            .map_db_err(DatabaseOperation::UpdateJobStatus, None)?;
        Ok(())
    }

    async fn mark_job_started(&self, id: Uuid) -> DatabaseResult<()> {
        sqlx::query("UPDATE jobs SET status = 'running', started_at = now() WHERE id = $1")
            .bind(id)
            .execute(self.pools.write())
            .await
            .map_db_err(DatabaseOperation::UpdateJobStatus, None)?;
        Ok(())
    }

    async fn mark_job_completed(&self, id: Uuid) -> DatabaseResult<()> {
        sqlx::query("UPDATE jobs SET status = 'completed', completed_at = now() WHERE id = $1")
            .bind(id)
            .execute(self.pools.write())
            .await
            .map_db_err(DatabaseOperation::UpdateJobStatus, None)?;
        Ok(())
    }

    async fn auto_fail_job(&self, id: Uuid, reason: &str) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = $1, auto_failed_at = now() WHERE id = $2",
        )
        .bind(reason)
        .bind(id)
        .execute(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::UpdateJobStatus, None)?;
        Ok(())
    }

    async fn job_failure_percent(&self, id: Uuid) -> DatabaseResult<f64> {
        let row = sqlx::query("SELECT job_failure_percent($1) AS pct")
            .bind(id)
            .fetch_one(self.pools.read())
            .await
            .map_db_err(DatabaseOperation::Query { description: "job_failure_percent".to_string() }, None)?;
        Ok(row.get("pct"))
    }
}

#[async_trait]
impl TableRepository for PgMetadataStore {
    async fn create_table(
        &self,
        id: Uuid,
        job_id: Uuid,
        table_name: &str,
        primary_key_column: &str,
        total_rows: i64,
        total_chunks: i32,
    ) -> DatabaseResult<MigrationTable> {
        let row = sqlx::query(
            r"
            INSERT INTO migration_tables (id, job_id, table_name, primary_key_column, total_rows, total_chunks, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING *
            ",
        )
        .bind(id)
        .bind(job_id)
        .bind(table_name)
        .bind(primary_key_column)
        .bind(total_rows)
        .bind(total_chunks)
        .fetch_one(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::CreateTable, None)?;

        table_from_row(&row)
    }

    async fn get_table(&self, id: Uuid) -> DatabaseResult<MigrationTable> {
        let row = sqlx::query("SELECT * FROM migration_tables WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pools.read())
            .await
            .map_db_err(DatabaseOperation::GetTable, None)?
            .ok_or_else(|| DatabaseError::NotFound {
                operation: Box::new(DatabaseOperation::GetTable),
                correlation_id: None,
            })?;

        table_from_row(&row)
    }

    async fn list_tables_for_job(&self, job_id: Uuid) -> DatabaseResult<Vec<MigrationTable>> {
        let rows = sqlx::query("SELECT * FROM migration_tables WHERE job_id = $1 ORDER BY table_name")
            .bind(job_id)
            .fetch_all(self.pools.read())
            .await
            .map_db_err(DatabaseOperation::GetTable, None)?;

        rows.iter().map(table_from_row).collect()
    }

    async fn set_table_status(&self, id: Uuid, status: TableStatus) -> DatabaseResult<()> {
        let completed_at_clause = matches!(status, TableStatus::Completed | TableStatus::Failed);
        sqlx::query(
            "UPDATE migration_tables SET status = $1, completed_at = CASE WHEN $2 THEN now() ELSE completed_at END WHERE id = $3",
        )
        .bind(status.to_string())
        .bind(completed_at_clause)
        .bind(id)
        .execute(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::UpdateTableProgress, None)?;
        Ok(())
    }

    async fn increment_table_progress(&self, id: Uuid, completed: bool) -> DatabaseResult<()> {
        if completed {
            sqlx::query("UPDATE migration_tables SET completed_chunks = completed_chunks + 1 WHERE id = $1")
                .bind(id)
                .execute(self.pools.write())
                .await
        } else {
            sqlx::query("UPDATE migration_tables SET failed_chunks = failed_chunks + 1 WHERE id = $1")
                .bind(id)
                .execute(self.pools.write())
                .await
        }
        .map_db_err(DatabaseOperation::UpdateTableProgress, None)?;
        Ok(())
    }
}

#[async_trait]
impl ChunkRepository for PgMetadataStore {
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
        let row = sqlx::query(
            r"
            INSERT INTO chunks (id, job_id, table_id, table_name, pk_start, pk_end, status, max_retries)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(job_id)
        .bind(table_id)
        .bind(table_name)
        .bind(pk_start)
        .bind(pk_end)
        .bind(max_retries)
        .fetch_one(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::CreateChunk, None)?;

        chunk_from_row(&row)
    }

    async fn get_chunk(&self, id: Uuid) -> DatabaseResult<Chunk> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pools.read())
            .await
            .map_db_err(DatabaseOperation::GetChunk, None)?
            .ok_or_else(|| DatabaseError::NotFound {
                operation: Box::new(DatabaseOperation::GetChunk),
                correlation_id: None,
            })?;

        chunk_from_row(&row)
    }

    async fn list_chunks(&self, job_id: Uuid, status: Option<ChunkStatus>) -> DatabaseResult<Vec<Chunk>> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM chunks WHERE job_id = $1 AND status = $2 ORDER BY pk_start")
                    .bind(job_id)
                    .bind(s.to_string())
                    .fetch_all(self.pools.read())
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM chunks WHERE job_id = $1 ORDER BY pk_start")
                    .bind(job_id)
                    .fetch_all(self.pools.read())
                    .await
            }
        }
        .map_db_err(DatabaseOperation::ListChunks, None)?;

        rows.iter().map(chunk_from_row).collect()
    }

    async fn lease_chunk(&self, job_id: Uuid, worker_id: &str) -> DatabaseResult<Option<Chunk>> {
        let row = sqlx::query(
            r"
            WITH claimed AS (
                SELECT id
                FROM chunks
                WHERE job_id = $1
                  AND (status = 'pending' OR (status = 'failed' AND retry_count < max_retries))
                  AND (next_retry_at IS NULL OR next_retry_at <= now())
                ORDER BY pk_start
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE chunks
            SET status = 'running',
                worker_id = $2,
                last_heartbeat = now(),
                started_at = now()
            FROM claimed
            WHERE chunks.id = claimed.id
            RETURNING chunks.*
            ",
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::LeaseChunk, None)?;

        row.map(|r| chunk_from_row(&r)).transpose()
    }

    async fn resume_chunk(&self, id: Uuid) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE chunks
            SET status = 'pending', worker_id = NULL, last_heartbeat = NULL, next_retry_at = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::ResumeChunk, None)?;
        Ok(())
    }

    async fn record_heartbeat(&self, id: Uuid) -> DatabaseResult<()> {
        sqlx::query("UPDATE chunks SET last_heartbeat = now() WHERE id = $1 AND status = 'running'")
            .bind(id)
            .execute(self.pools.write())
            .await
            .map_db_err(DatabaseOperation::UpsertHeartbeat, None)?;
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
        let validation_status = if source_row_count == target_row_count {
            ValidationStatus::Validated
        } else {
            ValidationStatus::Mismatched
        };

        sqlx::query(
            r"
            UPDATE chunks
            SET status = 'completed',
                rows_processed = $1,
                source_row_count = $2,
                target_row_count = $3,
                validation_status = $4,
                duration_ms = $5,
                completed_at = now()
            WHERE id = $6
            ",
        )
        .bind(rows_processed)
        .bind(source_row_count)
        .bind(target_row_count)
        .bind(validation_status.to_string())
        .bind(duration_ms)
        .bind(id)
        .execute(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::CompleteChunk, None)?;

        Ok(())
    }

    async fn fail_chunk(&self, id: Uuid, error: &str, next_retry_at: Option<DateTime<Utc>>) -> DatabaseResult<()> {
        sqlx::query(
            r"
            UPDATE chunks
            SET status = 'failed',
                retry_count = retry_count + 1,
                last_error = $1,
                next_retry_at = $2,
                worker_id = NULL
            WHERE id = $3
            ",
        )
        .bind(error)
        .bind(next_retry_at)
        .bind(id)
        .execute(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::FailChunk, None)?;
        Ok(())
    }

    async fn find_stale_chunks(&self, stale_before: DateTime<Utc>) -> DatabaseResult<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE status = 'running' AND last_heartbeat < $1")
            .bind(stale_before)
            .fetch_all(self.pools.read())
            .await
            .map_db_err(DatabaseOperation::FindStaleChunks, None)?;

        rows.iter().map(chunk_from_row).collect()
    }

    async fn append_execution_attempt(&self, attempt: &ExecutionAttempt) -> DatabaseResult<()> {
        sqlx::query(
            r"
            INSERT INTO execution_log
                (id, chunk_id, attempt_number, worker_id, status, rows_processed,
                 source_row_count, target_row_count, duration_ms, error_message, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(attempt.id)
        .bind(attempt.chunk_id)
        .bind(attempt.attempt_number)
        .bind(&attempt.worker_id)
        .bind(attempt.status.to_string())
        .bind(attempt.rows_processed)
        .bind(attempt.source_row_count)
        .bind(attempt.target_row_count)
        .bind(attempt.duration_ms)
        .bind(&attempt.error_message)
        .bind(attempt.started_at)
        .bind(attempt.completed_at)
        .execute(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::AppendExecutionAttempt, None)?;
        Ok(())
    }
}

#[async_trait]
impl HeartbeatRepository for PgMetadataStore {
    async fn upsert_heartbeat(&self, worker_id: &str, current_chunk: Option<Uuid>) -> DatabaseResult<()> {
        sqlx::query(
            r"
            INSERT INTO worker_heartbeats (worker_id, last_seen, current_chunk, status)
            VALUES ($1, now(), $2, 'active')
            ON CONFLICT (worker_id) DO UPDATE
            SET last_seen = now(), current_chunk = $2, status = 'active'
            ",
        )
        .bind(worker_id)
        .bind(current_chunk)
        .execute(self.pools.write())
        .await
        .map_db_err(DatabaseOperation::UpsertHeartbeat, None)?;
        Ok(())
    }

    async fn mark_worker_inactive(&self, worker_id: &str) -> DatabaseResult<()> {
        sqlx::query("UPDATE worker_heartbeats SET status = 'inactive' WHERE worker_id = $1")
            .bind(worker_id)
            .execute(self.pools.write())
            .await
            .map_db_err(DatabaseOperation::UpsertHeartbeat, None)?;
        Ok(())
    }

    async fn get_heartbeat(&self, worker_id: &str) -> DatabaseResult<Option<WorkerHeartbeatRow>> {
        let row = sqlx::query("SELECT * FROM worker_heartbeats WHERE worker_id = $1")
            .bind(worker_id)
            .fetch_optional(self.pools.read())
            .await
            .map_db_err(DatabaseOperation::Query { description: "get_heartbeat".to_string() }, None)?;

        row.map(|r| {
            let status: String = r.get("status");
            Ok(WorkerHeartbeatRow {
                worker_id: r.get("worker_id"),
                last_seen: r.get("last_seen"),
                current_chunk: r.get("current_chunk"),
                status: match status.as_str() {
                    "active" => WorkerStatus::Active,
                    _ => WorkerStatus::Inactive,
                },
            })
        })
        .transpose()
    }
}
