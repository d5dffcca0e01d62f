//! Migration control-plane server.
//!
//! Serves the job-lifecycle HTTP API and runs the stale-chunk recovery
//! sweep in the background (SPEC_FULL.md §5, §6).

mod bootstrap;

use std::net::SocketAddr;

use migration_api::AppState;
use migration_config::EngineConfig;
use migration_config::Validate;
use tokio_util::sync::CancellationToken;
use tracing::info;

type MainResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> MainResult {
    migration_common::initialize_environment();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting migration control plane");

    let config = EngineConfig::from_env();
    config.validate()?;
    info!(api_port = config.api.port, db = %config.database.safe_connection_string(), "configuration loaded");

    let services = bootstrap::setup_services(&config).await?;

    let shutdown = CancellationToken::new();
    bootstrap::spawn_recovery_loop(&services, &config, shutdown.clone());

    let state = AppState::new(services.jobs, services.tables, services.chunks, services.queue);
    let app = migration_api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port).parse()?;
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    Ok(())
}
