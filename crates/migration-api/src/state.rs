//! Application state for Axum handlers: the services every route needs,
//! built once at startup and cloned cheaply per request (every field is
//! an `Arc`).

use std::sync::Arc;

use migration_metadata::{ChunkRepository, JobRepository, TableRepository};
use migration_queue::WorkQueue;

/// Shared services passed to every Axum handler via dependency injection.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobRepository>,
    pub tables: Arc<dyn TableRepository>,
    pub chunks: Arc<dyn ChunkRepository>,
    pub queue: Arc<dyn WorkQueue>,
}

impl AppState {
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        tables: Arc<dyn TableRepository>,
        chunks: Arc<dyn ChunkRepository>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self { jobs, tables, chunks, queue }
    }
}
