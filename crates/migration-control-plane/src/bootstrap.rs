//! Service initialization for the control-plane binary, separated from
//! `main.rs` the way `codetriever-api::bootstrap` separates setup from
//! the entry point.

use std::sync::Arc;

use migration_config::EngineConfig;
use migration_engine::RecoveryLoop;
use migration_metadata::{ChunkRepository, JobRepository, PgMetadataStore, PoolManager, TableRepository, run_migrations};
use migration_queue::{PgNotifyQueue, WorkQueue};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type BootstrapResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Everything the HTTP surface and the recovery loop need.
pub struct Services {
    pub jobs: Arc<dyn JobRepository>,
    pub tables: Arc<dyn TableRepository>,
    pub chunks: Arc<dyn ChunkRepository>,
    pub queue: Arc<dyn WorkQueue>,
}

/// Connect to the metadata store, run pending migrations, and build the
/// shared repository + queue handles.
///
/// # Errors
/// Returns an error if the metadata store or the notify-queue listener
/// connection cannot be established.
pub async fn setup_services(config: &EngineConfig) -> BootstrapResult<Services> {
    info!("connecting to metadata store at {}", config.database.safe_connection_string());
    let pools = PoolManager::connect(&config.database).await?;

    info!("running metadata store migrations");
    run_migrations(pools.write()).await?;

    let store = Arc::new(PgMetadataStore::new(pools.clone()));
    let queue = Arc::new(PgNotifyQueue::connect(pools.write().clone()).await?);

    Ok(Services {
        jobs: Arc::clone(&store) as Arc<dyn JobRepository>,
        tables: Arc::clone(&store) as Arc<dyn TableRepository>,
        chunks: Arc::clone(&store) as Arc<dyn ChunkRepository>,
        queue,
    })
}

/// Spawn the stale-chunk recovery sweep as a background task.
///
/// The handle is intentionally dropped by the caller; the task runs for
/// the lifetime of the process and exits when `shutdown` is cancelled.
pub fn spawn_recovery_loop(services: &Services, config: &EngineConfig, shutdown: CancellationToken) {
    let recovery = RecoveryLoop::new(
        Arc::clone(&services.chunks),
        Arc::clone(&services.jobs),
        Arc::clone(&services.tables),
        Arc::clone(&services.queue),
        config.timing.stale_heartbeat(),
        config.timing.recovery_interval(),
    );
    tokio::spawn(async move {
        recovery.run(shutdown).await;
    });
}
