//! The worker process main loop: lease a chunk, run it through the
//! executor, heartbeat its own presence, and shut down gracefully on
//! SIGINT/SIGTERM (SPEC_FULL.md §4.3, §6 exit codes).
//!
//! Spawn shape follows `codetriever-indexing`'s `BackgroundWorker::run`:
//! a `JoinSet` holding the single lease-loop task, polled against a
//! shutdown signal rather than run inline, so a future multi-worker-per-
//! process topology is a matter of spawning more tasks into the same set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use migration_config::{BatchConfig, TimingConfig};
use migration_metadata::{ChunkRepository, EndpointConfig, HeartbeatRepository, Job, JobRepository, TableRepository};
use migration_queue::WorkQueue;

use crate::error::{EngineError, EngineResult};
use crate::executor::ChunkExecutor;
use crate::supervisor::JobSupervisor;

/// Process exit codes, per SPEC_FULL.md §6: `0` clean shutdown, `1`
/// unrecoverable startup error, `2` crashed mid-lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Clean = 0,
    StartupFailure = 1,
    CrashedMidLease = 2,
}

/// One worker process. Holds a connection-pool cache keyed by endpoint so
/// repeated chunks against the same source/target don't reconnect each
/// time, mirroring the teacher's `get_or_create_storage` DashMap cache.
pub struct Worker {
    worker_id: String,
    job_id: Uuid,
    jobs: Arc<dyn JobRepository>,
    tables: Arc<dyn TableRepository>,
    chunks: Arc<dyn ChunkRepository>,
    heartbeats: Arc<dyn HeartbeatRepository>,
    queue: Arc<dyn WorkQueue>,
    pool_cache: DashMap<String, PgPool>,
    pk_column_cache: Mutex<HashMap<Uuid, String>>,
    supervisor: JobSupervisor,
    batch: BatchConfig,
    timing: TimingConfig,
}

impl Worker {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: String,
        job_id: Uuid,
        jobs: Arc<dyn JobRepository>,
        tables: Arc<dyn TableRepository>,
        chunks: Arc<dyn ChunkRepository>,
        heartbeats: Arc<dyn HeartbeatRepository>,
        queue: Arc<dyn WorkQueue>,
        batch: BatchConfig,
        timing: TimingConfig,
    ) -> Self {
        let supervisor = JobSupervisor::new(Arc::clone(&jobs), Arc::clone(&tables));
        Self {
            worker_id,
            job_id,
            jobs,
            tables,
            chunks,
            heartbeats,
            queue,
            pool_cache: DashMap::new(),
            pk_column_cache: Mutex::new(HashMap::new()),
            supervisor,
            batch,
            timing,
        }
    }

    /// Run until `shutdown` is cancelled (SIGINT/SIGTERM) or the job leaves
    /// no more leaseable chunks. Spawns the lease loop into its own
    /// `JoinSet` slot so the shutdown race is structured, not ad hoc.
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerExit {
        self.heartbeats.upsert_heartbeat(&self.worker_id, None).await.ok();

        let mut tasks: JoinSet<EngineResult<()>> = JoinSet::new();
        let loop_shutdown = shutdown.clone();
        tasks.spawn(self.lease_loop(loop_shutdown));

        let outcome = tasks.join_next().await;
        self.heartbeats.mark_worker_inactive(&self.worker_id).await.ok();

        match outcome {
            Some(Ok(Ok(()))) => WorkerExit::Clean,
            Some(Ok(Err(e))) => {
                tracing::error!(error = %e, "worker loop exited with error");
                WorkerExit::CrashedMidLease
            }
            Some(Err(join_err)) => {
                tracing::error!(error = %join_err, "worker task panicked");
                WorkerExit::CrashedMidLease
            }
            None => WorkerExit::Clean,
        }
    }

    async fn lease_loop(&self, shutdown: CancellationToken) -> EngineResult<()> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                _ = self.queue.recv_hint(self.timing.queue_poll_timeout()) => {}
            }

            match self.chunks.lease_chunk(self.job_id, &self.worker_id).await? {
                Some(chunk) => {
                    self.heartbeats.upsert_heartbeat(&self.worker_id, Some(chunk.id)).await.ok();
                    let pk_column = self.pk_column_for(chunk.table_id, &chunk.table_name).await?;

                    let job = self.jobs.get_job(self.job_id).await?;
                    let executor = self.executor_for(&job).await?;

                    let attempt_number = chunk.retry_count + 1;
                    let success = executor.execute(&chunk, &pk_column, &self.worker_id, attempt_number).await.is_ok();
                    if let Err(e) = self.supervisor.record_chunk_outcome(self.job_id, chunk.table_id, success).await {
                        tracing::error!(chunk_id = %chunk.id, error = %e, "failed to record chunk outcome");
                    }
                    self.heartbeats.upsert_heartbeat(&self.worker_id, None).await.ok();
                }
                None => {
                    // No lease-eligible chunk right now; the queue hint
                    // (or the poll timeout) already rate-limits this loop.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn pk_column_for(&self, table_id: Uuid, table_name: &str) -> EngineResult<String> {
        if let Some(col) = self.pk_column_cache.lock().await.get(&table_id) {
            return Ok(col.clone());
        }
        let table = self.tables.get_table(table_id).await?;
        self.pk_column_cache.lock().await.insert(table_id, table.primary_key_column.clone());
        tracing::trace!(table = %table_name, pk_column = %table.primary_key_column, "resolved pk column");
        Ok(table.primary_key_column)
    }

    async fn executor_for(&self, job: &Job) -> EngineResult<ChunkExecutor> {
        let source_pool = self.pool_for(&job.source_config).await?;
        let target_pool = self.pool_for(&job.target_config).await?;
        Ok(ChunkExecutor::new(
            source_pool,
            target_pool,
            Arc::clone(&self.chunks),
            self.batch.clone(),
            self.timing.heartbeat_interval(),
        ))
    }

    async fn pool_for(&self, endpoint: &EndpointConfig) -> EngineResult<PgPool> {
        let key = format!("{}:{}/{}", endpoint.host, endpoint.port, endpoint.database);
        if let Some(pool) = self.pool_cache.get(&key) {
            return Ok(pool.clone());
        }

        let url = format!(
            "postgres://{}:{}@{}:{}/{}",
            endpoint.username, endpoint.password, endpoint.host, endpoint.port, endpoint.database
        );
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::from_source_sqlx("connect_endpoint", e))?;

        self.pool_cache.insert(key, pool.clone());
        Ok(pool)
    }
}
