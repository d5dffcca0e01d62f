//! Standalone migration worker process.
//!
//! Leases chunks for one job from the metadata store, runs them through
//! the chunk executor, and exits with the code the control plane expects
//! to see in its process supervisor (SPEC_FULL.md §6):
//! `0` clean shutdown, `1` unrecoverable startup error, `2` crashed
//! mid-lease. Grounded on `original_source/services/worker/worker.py`'s
//! `Worker` (worker id from env or a random uuid, SIGINT/SIGTERM-driven
//! graceful stop) and `codetriever-indexing`'s note that the background
//! worker loop is meant to be extractable into its own binary.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use migration_config::EngineConfig;
use migration_config::Validate;
use migration_engine::{Worker, WorkerExit};
use migration_metadata::{ChunkRepository, HeartbeatRepository, JobRepository, PgMetadataStore, PoolManager, TableRepository};
use migration_queue::{PgNotifyQueue, WorkQueue};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// Processes chunks for a single migration job until none remain.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Job to process chunks for.
    #[arg(long)]
    job_id: Uuid,

    /// Worker identity. Defaults to a random id if unset.
    #[arg(long)]
    worker_id: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    migration_common::initialize_environment();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let worker_id = args.worker_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    match run(args.job_id, worker_id.clone()).await {
        Ok(exit) => {
            info!(worker_id, exit = ?exit, "worker exiting");
            ExitCode::from(exit as u8)
        }
        Err(e) => {
            error!(worker_id, error = %e, "worker failed to start");
            ExitCode::from(WorkerExit::StartupFailure as u8)
        }
    }
}

async fn run(job_id: Uuid, worker_id: String) -> Result<WorkerExit, Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env();
    config.validate()?;

    let pools = PoolManager::connect(&config.database).await?;
    let store = Arc::new(PgMetadataStore::new(pools.clone()));
    let queue = Arc::new(PgNotifyQueue::connect(pools.write().clone()).await?);

    let worker = Worker::new(
        worker_id,
        job_id,
        Arc::clone(&store) as Arc<dyn JobRepository>,
        Arc::clone(&store) as Arc<dyn TableRepository>,
        Arc::clone(&store) as Arc<dyn ChunkRepository>,
        Arc::clone(&store) as Arc<dyn HeartbeatRepository>,
        queue as Arc<dyn WorkQueue>,
        config.batch,
        config.timing,
    );

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        signal_shutdown.cancel();
    });

    Ok(worker.run(shutdown).await)
}
