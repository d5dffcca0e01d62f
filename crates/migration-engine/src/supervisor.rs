//! The job supervisor: aggregates chunk terminal transitions into table
//! and job status (SPEC_FULL.md §4.6). Invoked synchronously right after
//! the executor records a chunk's outcome and after a manual resume —
//! one of the two forms the spec calls acceptable ("triggers... or a
//! poller; both are acceptable"). This engine uses the trigger form.

use std::sync::Arc;
use uuid::Uuid;

use migration_metadata::{JobRepository, JobStatus, TableRepository, TableStatus};

use crate::error::EngineResult;

pub struct JobSupervisor {
    jobs: Arc<dyn JobRepository>,
    tables: Arc<dyn TableRepository>,
}

impl JobSupervisor {
    #[must_use]
    pub fn new(jobs: Arc<dyn JobRepository>, tables: Arc<dyn TableRepository>) -> Self {
        Self { jobs, tables }
    }

    /// Record one chunk's terminal outcome and roll the aggregate table
    /// and job state forward if this was the table's/job's last chunk.
    #[tracing::instrument(skip(self), fields(table_id = %table_id, job_id = %job_id))]
    pub async fn record_chunk_outcome(&self, job_id: Uuid, table_id: Uuid, success: bool) -> EngineResult<()> {
        self.tables.increment_table_progress(table_id, success).await?;
        self.jobs.increment_job_progress(job_id, success).await?;

        let table = self.tables.get_table(table_id).await?;
        if table.completed_chunks + table.failed_chunks >= table.total_chunks {
            let status = if table.failed_chunks == 0 { TableStatus::Completed } else { TableStatus::Failed };
            self.tables.set_table_status(table_id, status).await?;
            tracing::info!(table = %table.table_name, status = %status, "table reached terminal state");
        }

        self.maybe_finalize_job(job_id).await
    }

    /// Re-check the job's aggregate state, e.g. after a resume brought a
    /// previously-failed table back to life.
    pub async fn maybe_finalize_job(&self, job_id: Uuid) -> EngineResult<()> {
        let job = self.jobs.get_job(job_id).await?;
        if job.total_chunks == 0 || job.auto_failed_at.is_some() {
            return Ok(());
        }
        if job.completed_chunks + job.failed_chunks < job.total_chunks {
            return Ok(());
        }
        if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            return Ok(());
        }

        if job.failed_chunks == 0 {
            self.jobs.mark_job_completed(job_id).await?;
            tracing::info!(job_id = %job_id, "job completed");
        } else {
            self.jobs.set_job_status(job_id, JobStatus::Failed, Some("one or more chunks failed")).await?;
            tracing::warn!(job_id = %job_id, failed_chunks = job.failed_chunks, "job finished with failures");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_metadata::mock::MockMetadataStore;
    use migration_metadata::EndpointConfig;

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
    async fn test_table_completes_when_all_chunks_succeed() {
        let store = Arc::new(MockMetadataStore::new());
        let supervisor = JobSupervisor::new(store.clone(), store.clone());

        let job = store.create_job(Uuid::new_v4(), &endpoint(), &endpoint(), 50.0, None).await.unwrap();
        let table = store.create_table(Uuid::new_v4(), job.id, "orders", "id", 100, 2).await.unwrap();
        store.set_job_counts(job.id, 1, 2).await.unwrap();

        supervisor.record_chunk_outcome(job.id, table.id, true).await.unwrap();
        supervisor.record_chunk_outcome(job.id, table.id, true).await.unwrap();

        let table = store.get_table(table.id).await.unwrap();
        assert_eq!(table.status, migration_metadata::TableStatus::Completed);

        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_job_fails_when_any_chunk_fails() {
        let store = Arc::new(MockMetadataStore::new());
        let supervisor = JobSupervisor::new(store.clone(), store.clone());

        let job = store.create_job(Uuid::new_v4(), &endpoint(), &endpoint(), 50.0, None).await.unwrap();
        let table = store.create_table(Uuid::new_v4(), job.id, "orders", "id", 100, 2).await.unwrap();
        store.set_job_counts(job.id, 1, 2).await.unwrap();

        supervisor.record_chunk_outcome(job.id, table.id, true).await.unwrap();
        supervisor.record_chunk_outcome(job.id, table.id, false).await.unwrap();

        let table = store.get_table(table.id).await.unwrap();
        assert_eq!(table.status, migration_metadata::TableStatus::Failed);

        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }
}
