//! The planner: discovers source tables, partitions each by primary-key
//! range into chunks, and persists table/chunk rows (SPEC_FULL.md §4.1).

use std::sync::Arc;
use uuid::Uuid;

use migration_metadata::{ChunkRepository, JobRepository, TableRepository};
use migration_queue::WorkQueue;

use crate::error::{EngineError, EngineResult};
use crate::introspect::SourceIntrospector;

/// One planned PK range, pre-persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedChunk {
    pub pk_start: i64,
    pub pk_end: i64,
}

/// Partition `[min_pk, max_pk]` into chunks of roughly `target_rows_per_chunk`
/// rows each, per SPEC_FULL.md §4.1 step 3. Pure function, independently
/// testable of any database — ports `shared/chunking.py::ChunkPlanner.calculate_chunks`.
#[must_use]
pub fn calculate_chunks(min_pk: i64, max_pk: i64, total_rows: i64, target_rows_per_chunk: i64) -> Vec<PlannedChunk> {
    assert!(min_pk <= max_pk, "min_pk must be <= max_pk");
    assert!(target_rows_per_chunk > 0, "target_rows_per_chunk must be positive");

    if total_rows <= target_rows_per_chunk {
        return vec![PlannedChunk { pk_start: min_pk, pk_end: max_pk }];
    }

    let num_chunks = total_rows.div_ceil(target_rows_per_chunk);
    let pk_span = max_pk - min_pk + 1;
    let range_per_chunk = pk_span.div_ceil(num_chunks);

    let mut chunks = Vec::new();
    let mut current_start = min_pk;
    while current_start <= max_pk {
        let current_end = (current_start + range_per_chunk - 1).min(max_pk);
        chunks.push(PlannedChunk { pk_start: current_start, pk_end: current_end });
        current_start = current_end + 1;
    }
    chunks
}

/// Orchestrates table analysis + chunk persistence for one job.
pub struct Planner {
    introspector: Arc<dyn SourceIntrospector>,
    tables: Arc<dyn TableRepository>,
    chunks: Arc<dyn ChunkRepository>,
    jobs: Arc<dyn JobRepository>,
    queue: Arc<dyn WorkQueue>,
}

/// Outcome of planning one job: how much got planned, and which tables
/// were skipped and why (SPEC_FULL.md §4.1 failure handling: "record an
/// error and continue with the others").
#[derive(Debug, Default)]
pub struct PlanSummary {
    pub total_tables: i32,
    pub total_chunks: i32,
    pub skipped_tables: Vec<(String, String)>,
}

impl Planner {
    pub fn new(
        introspector: Arc<dyn SourceIntrospector>,
        tables: Arc<dyn TableRepository>,
        chunks: Arc<dyn ChunkRepository>,
        jobs: Arc<dyn JobRepository>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self { introspector, tables, chunks, jobs, queue }
    }

    /// Plan an entire job: discover tables, chunk each, persist, publish.
    ///
    /// # Errors
    /// Returns an error only for failures that make planning the whole job
    /// meaningless (e.g. cannot list tables at all). Per-table failures are
    /// recorded in the summary and do not abort the job.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn plan_job(&self, job_id: Uuid, target_rows_per_chunk: i64, max_retries: i32) -> EngineResult<PlanSummary> {
        let table_names = self.introspector.list_tables().await?;
        tracing::info!(count = table_names.len(), "discovered tables");

        let mut summary = PlanSummary::default();

        for table_name in table_names {
            match self.plan_table(job_id, &table_name, target_rows_per_chunk, max_retries).await {
                Ok(Some(chunk_count)) => {
                    summary.total_tables += 1;
                    summary.total_chunks += chunk_count;
                }
                Ok(None) => {
                    tracing::debug!(table = %table_name, "skipped: no PK or empty");
                }
                Err(e) => {
                    tracing::warn!(table = %table_name, error = %e, "table planning failed, continuing");
                    summary.skipped_tables.push((table_name, e.to_string()));
                }
            }
        }

        self.jobs.set_job_counts(job_id, summary.total_tables, summary.total_chunks).await?;

        if summary.total_chunks == 0 {
            self.jobs
                .set_job_status(job_id, migration_metadata::JobStatus::Failed, Some("no chunks planned"))
                .await?;
        } else {
            self.queue.notify_chunks_available(job_id).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to publish planning-complete hint");
            });
        }

        Ok(summary)
    }

    async fn plan_table(
        &self,
        job_id: Uuid,
        table_name: &str,
        target_rows_per_chunk: i64,
        max_retries: i32,
    ) -> EngineResult<Option<i32>> {
        let Some(pk_column) = self.introspector.primary_key_column(table_name).await? else {
            return Ok(None);
        };

        let Some(stats) = self.introspector.table_stats(table_name, &pk_column).await? else {
            return Ok(None);
        };

        let planned = calculate_chunks(stats.min_pk, stats.max_pk, stats.total_rows, target_rows_per_chunk);

        let table = self
            .tables
            .create_table(Uuid::new_v4(), job_id, table_name, &pk_column, stats.total_rows, planned.len() as i32)
            .await
            .map_err(EngineError::from)?;

        for chunk in &planned {
            self.chunks
                .create_chunk(Uuid::new_v4(), job_id, table.id, table_name, chunk.pk_start, chunk.pk_end, max_retries)
                .await
                .map_err(EngineError::from)?;
        }

        Ok(Some(planned.len() as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_table_yields_single_chunk() {
        let chunks = calculate_chunks(1, 500, 500, 100_000);
        assert_eq!(chunks, vec![PlannedChunk { pk_start: 1, pk_end: 500 }]);
    }

    #[test]
    fn test_single_row_table() {
        let chunks = calculate_chunks(42, 42, 1, 100_000);
        assert_eq!(chunks, vec![PlannedChunk { pk_start: 42, pk_end: 42 }]);
    }

    #[test]
    fn test_exact_even_division() {
        let chunks = calculate_chunks(1, 10_000, 10_000, 2_500);
        assert_eq!(
            chunks,
            vec![
                PlannedChunk { pk_start: 1, pk_end: 2_500 },
                PlannedChunk { pk_start: 2_501, pk_end: 5_000 },
                PlannedChunk { pk_start: 5_001, pk_end: 7_500 },
                PlannedChunk { pk_start: 7_501, pk_end: 10_000 },
            ]
        );
    }

    #[test]
    fn test_ranges_are_contiguous_and_cover_full_span() {
        let chunks = calculate_chunks(1, 9_973, 9_973, 1_000);
        assert_eq!(chunks.first().unwrap().pk_start, 1);
        assert_eq!(chunks.last().unwrap().pk_end, 9_973);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].pk_end + 1, pair[1].pk_start);
        }
    }

    #[test]
    fn test_sparse_pk_still_covers_full_range() {
        // total_rows far below the PK span: sparse keys, still must cover [min,max].
        let chunks = calculate_chunks(1, 1_000_000, 50, 100);
        assert_eq!(chunks.first().unwrap().pk_start, 1);
        assert_eq!(chunks.last().unwrap().pk_end, 1_000_000);
    }
}
