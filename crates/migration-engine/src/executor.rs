//! The chunk executor: copies one PK range from source to target under a
//! single target transaction, per SPEC_FULL.md §4.4's seven phases.
//!
//! Rows are moved as opaque JSON blobs (`row_to_json` / `jsonb_populate_recordset`)
//! rather than through per-column typed bindings. Schema-mapping and type
//! coercion beyond what Postgres does for us are explicit non-goals, so the
//! executor never needs to know a table's column list — it asks Postgres to
//! serialize and rehydrate rows on both ends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use sqlx::{PgPool, Row};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use migration_config::BatchConfig;
use migration_metadata::{Chunk, ChunkRepository, ChunkStatus, ExecutionAttempt};

use crate::error::{EngineError, EngineResult};

/// Result of one executor invocation, already persisted via `ChunkRepository`.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub chunk_id: Uuid,
    pub rows_processed: i64,
    pub source_row_count: i64,
    pub target_row_count: i64,
    pub duration_ms: i64,
    pub validated: bool,
}

pub struct ChunkExecutor {
    source_pool: PgPool,
    target_pool: PgPool,
    chunks: Arc<dyn ChunkRepository>,
    batch: BatchConfig,
    heartbeat_interval: Duration,
}

impl ChunkExecutor {
    #[must_use]
    pub fn new(
        source_pool: PgPool,
        target_pool: PgPool,
        chunks: Arc<dyn ChunkRepository>,
        batch: BatchConfig,
        heartbeat_interval: Duration,
    ) -> Self {
        Self { source_pool, target_pool, chunks, batch, heartbeat_interval }
    }

    /// Execute one leased chunk end to end, recording the execution attempt
    /// and the chunk's terminal state regardless of outcome.
    #[tracing::instrument(skip(self, chunk), fields(chunk_id = %chunk.id, table = %chunk.table_name))]
    pub async fn execute(
        &self,
        chunk: &Chunk,
        pk_column: &str,
        worker_id: &str,
        attempt_number: i32,
    ) -> EngineResult<ExecutionOutcome> {
        let attempt_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        let cancel = CancellationToken::new();
        let heartbeat_handle = self.spawn_heartbeat(chunk.id, cancel.clone());

        let result = self.run_copy(chunk, pk_column, worker_id).await;

        cancel.cancel();
        let _ = heartbeat_handle.await;

        let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

        match result {
            // `run_copy` only returns `Ok` once counts matched and the
            // target transaction already committed; a mismatch is
            // reported as `Err(ValidationMismatchError)` below instead.
            Ok((rows_processed, source_count, target_count)) => {
                self.chunks
                    .complete_chunk(chunk.id, rows_processed, source_count, target_count, duration_ms)
                    .await?;
                self.chunks
                    .append_execution_attempt(&ExecutionAttempt {
                        id: attempt_id,
                        chunk_id: chunk.id,
                        attempt_number,
                        worker_id: worker_id.to_string(),
                        status: ChunkStatus::Completed,
                        rows_processed: Some(rows_processed),
                        source_row_count: Some(source_count),
                        target_row_count: Some(target_count),
                        duration_ms: Some(duration_ms),
                        error_message: None,
                        started_at,
                        completed_at: Some(chrono::Utc::now()),
                    })
                    .await?;

                Ok(ExecutionOutcome {
                    chunk_id: chunk.id,
                    rows_processed,
                    source_row_count: source_count,
                    target_row_count: target_count,
                    duration_ms,
                    validated: true,
                })
            }
            Err(e) => {
                let next_retry_at = (e.is_retryable() && chunk.retry_count + 1 < chunk.max_retries)
                    .then(|| chrono::Utc::now() + chrono::Duration::seconds(2_i64.pow((chunk.retry_count + 1) as u32)));

                self.chunks.fail_chunk(chunk.id, &e.to_string(), next_retry_at).await?;
                self.chunks
                    .append_execution_attempt(&ExecutionAttempt {
                        id: attempt_id,
                        chunk_id: chunk.id,
                        attempt_number,
                        worker_id: worker_id.to_string(),
                        status: ChunkStatus::Failed,
                        rows_processed: None,
                        source_row_count: None,
                        target_row_count: None,
                        duration_ms: Some(duration_ms),
                        error_message: Some(e.to_string()),
                        started_at,
                        completed_at: Some(chrono::Utc::now()),
                    })
                    .await?;
                Err(e)
            }
        }
    }

    /// Phases 3-6: delete-then-insert idempotency cut, streamed copy with
    /// adaptive batch sizing, and count validation, all in one target
    /// transaction. Returns `(rows_processed, source_count, target_count)`.
    async fn run_copy(&self, chunk: &Chunk, pk_column: &str, worker_id: &str) -> EngineResult<(i64, i64, i64)> {
        let mut target_tx = self
            .target_pool
            .begin()
            .await
            .map_err(|e| EngineError::from_target_sqlx("begin_transaction", e))?;

        // Phase 4: idempotency cut. A retried chunk may have partially
        // written rows from a prior attempt; delete the whole range first
        // so the copy below is a clean insert, not an upsert.
        let delete_sql = format!(
            r#"DELETE FROM "{table}" WHERE "{pk}" BETWEEN $1 AND $2"#,
            table = chunk.table_name,
            pk = pk_column,
        );
        sqlx::query(&delete_sql)
            .bind(chunk.pk_start)
            .bind(chunk.pk_end)
            .execute(&mut *target_tx)
            .await
            .map_err(|e| EngineError::from_target_sqlx("idempotency_delete", e))?;

        // Phase 5: streamed copy, keyset-paginated by PK ascending in place
        // of a held-open server-side cursor, with adaptive batch sizing.
        let mut rows_processed: i64 = 0;
        let mut last_pk = chunk.pk_start - 1;
        let mut batch_size = self.batch.batch_size as i64;

        loop {
            let batch_start = Instant::now();

            let select_sql = format!(
                r#"SELECT row_to_json(t) AS row_json FROM (
                       SELECT * FROM "{table}" WHERE "{pk}" > $1 AND "{pk}" <= $2 ORDER BY "{pk}" ASC LIMIT $3
                   ) t"#,
                table = chunk.table_name,
                pk = pk_column,
            );
            let rows = sqlx::query(&select_sql)
                .bind(last_pk)
                .bind(chunk.pk_end)
                .bind(batch_size)
                .fetch_all(&self.source_pool)
                .await
                .map_err(|e| EngineError::from_source_sqlx("streamed_select", e))?;

            if rows.is_empty() {
                break;
            }

            let batch: Vec<Value> = rows.iter().map(|r| r.get::<Value, _>("row_json")).collect();
            self.check_lease(chunk.id, worker_id).await?;

            let insert_sql = format!(
                r#"INSERT INTO "{table}" SELECT * FROM jsonb_populate_recordset(NULL::"{table}", $1::jsonb)"#,
                table = chunk.table_name,
            );
            sqlx::query(&insert_sql)
                .bind(Value::Array(batch.clone()))
                .execute(&mut *target_tx)
                .await
                .map_err(|e| EngineError::from_target_sqlx("streamed_insert", e))?;

            rows_processed += batch.len() as i64;
            last_pk = chunk.pk_end.min(last_pk + batch_size);

            batch_size = adjust_batch_size(batch_size, batch_start.elapsed(), &self.batch);

            if batch.len() < batch_size as usize && last_pk >= chunk.pk_end {
                break;
            }
        }

        // Phase 6: count validation over the whole range, both sides.
        let source_count = self
            .count_range(&self.source_pool, &chunk.table_name, pk_column, chunk.pk_start, chunk.pk_end)
            .await?;
        let target_count_sql = format!(
            r#"SELECT COUNT(*) AS n FROM "{table}" WHERE "{pk}" BETWEEN $1 AND $2"#,
            table = chunk.table_name,
            pk = pk_column,
        );
        let target_count: i64 = sqlx::query(&target_count_sql)
            .bind(chunk.pk_start)
            .bind(chunk.pk_end)
            .fetch_one(&mut *target_tx)
            .await
            .map_err(|e| EngineError::from_target_sqlx("target_count", e))?
            .get("n");

        // Phase 7: a count mismatch rolls back the whole copy rather than
        // committing a chunk that can never satisfy the terminal-state
        // invariant (`completed` requires `source_row_count == target_row_count`).
        if source_count != target_count {
            target_tx.rollback().await.map_err(|e| EngineError::from_target_sqlx("rollback", e))?;
            return Err(EngineError::ValidationMismatchError { chunk_id: chunk.id, source_count, target_count });
        }

        target_tx.commit().await.map_err(|e| EngineError::from_target_sqlx("commit", e))?;

        Ok((rows_processed, source_count, target_count))
    }

    async fn count_range(&self, pool: &PgPool, table: &str, pk_column: &str, pk_start: i64, pk_end: i64) -> EngineResult<i64> {
        let sql = format!(r#"SELECT COUNT(*) AS n FROM "{table}" WHERE "{pk_column}" BETWEEN $1 AND $2"#);
        let row = sqlx::query(&sql)
            .bind(pk_start)
            .bind(pk_end)
            .fetch_one(pool)
            .await
            .map_err(|e| EngineError::from_source_sqlx("source_count", e))?;
        Ok(row.get("n"))
    }

    /// Guard against a lease the recovery loop has already reassigned
    /// (SPEC_FULL.md §4.5): re-check ownership mid-copy, not just at the
    /// start, since a long chunk can outlive its own lease.
    async fn check_lease(&self, chunk_id: Uuid, worker_id: &str) -> EngineResult<()> {
        let current = self.chunks.get_chunk(chunk_id).await?;
        let still_ours = current.status == ChunkStatus::Running && current.worker_id.as_deref() == Some(worker_id);
        if still_ours {
            Ok(())
        } else {
            Err(EngineError::LeaseLostError { chunk_id })
        }
    }

    fn spawn_heartbeat(&self, chunk_id: Uuid, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let chunks = Arc::clone(&self.chunks);
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        if let Err(e) = chunks.record_heartbeat(chunk_id).await {
                            tracing::warn!(chunk_id = %chunk_id, error = %e, "heartbeat write failed");
                        }
                    }
                }
            }
        })
    }
}

/// Adjust batch size toward `target_latency_ms`, moving at most 20% per
/// step and staying within `[batch_min, batch_max]` (SPEC_FULL.md §4.4.1).
fn adjust_batch_size(current: i64, elapsed: Duration, cfg: &BatchConfig) -> i64 {
    let target_ms = cfg.target_latency_ms as f64;
    let actual_ms = (elapsed.as_millis() as f64).max(1.0);
    let ratio = (target_ms / actual_ms).clamp(0.8, 1.2);
    let proposed = (current as f64 * ratio).round() as i64;
    proposed.clamp(cfg.batch_min as i64, cfg.batch_max as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BatchConfig {
        BatchConfig { batch_size: 5_000, batch_min: 1_000, batch_max: 50_000, target_latency_ms: 500 }
    }

    #[test]
    fn test_adjust_batch_size_grows_when_fast() {
        let next = adjust_batch_size(5_000, Duration::from_millis(100), &cfg());
        assert!(next > 5_000);
        assert!(next <= 6_000);
    }

    #[test]
    fn test_adjust_batch_size_shrinks_when_slow() {
        let next = adjust_batch_size(5_000, Duration::from_millis(2_000), &cfg());
        assert!(next < 5_000);
        assert!(next >= 4_000);
    }

    #[test]
    fn test_adjust_batch_size_respects_bounds() {
        let next = adjust_batch_size(49_900, Duration::from_millis(10), &cfg());
        assert!(next <= 50_000);
        let next = adjust_batch_size(1_050, Duration::from_millis(10_000), &cfg());
        assert!(next >= 1_000);
    }
}
