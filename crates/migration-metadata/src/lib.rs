//! Durable state for the migration engine: jobs, tables, chunks,
//! execution log and worker heartbeats, backed by Postgres.

pub mod error;
pub mod migrations;
pub mod mock;
pub mod models;
pub mod pool;
pub mod repository;
pub mod traits;

pub use error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
pub use migrations::run_migrations;
pub use mock::MockMetadataStore;
pub use models::{
    Chunk, ChunkStatus, EndpointConfig, ExecutionAttempt, Job, JobStatus, MigrationTable, TableStatus,
    ValidationStatus, WorkerHeartbeatRow, WorkerStatus,
};
pub use pool::{ConnectionStats, PoolManager, PoolStats};
pub use repository::PgMetadataStore;
pub use traits::{ChunkRepository, HeartbeatRepository, JobRepository, TableRepository};
