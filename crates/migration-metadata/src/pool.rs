//! Connection pool management for the metadata store.
//!
//! The teacher splits write/read/analytics pools three ways; this engine
//! only has two access patterns worth separating: writers (planner,
//! executors, recovery loop, supervisor) and readers (status/health
//! endpoints), so `PoolManager` holds two `PgPool`s sized independently.

use migration_config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::error::{DatabaseError, DatabaseResult};

/// Live connection pools plus the config they were built from.
#[derive(Clone)]
pub struct PoolManager {
    write_pool: PgPool,
    read_pool: PgPool,
}

/// Point-in-time counters for one pool, mirroring `sqlx::Pool`'s own gauges.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStats {
    pub size: u32,
    pub idle: u32,
}

/// Combined stats for both pools, surfaced on the `GET /health` endpoint.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub write: ConnectionStats,
    pub read: ConnectionStats,
}

impl PoolManager {
    /// Build both pools from a single `DatabaseConfig`. The write pool is
    /// sized to `max_connections`; the read pool is capped lower since
    /// status reads are short and numerous rather than long and few.
    ///
    /// # Errors
    /// Returns `DatabaseError::ConnectionFailed` if either pool cannot be
    /// established within `connect_timeout_seconds`.
    pub async fn connect(config: &DatabaseConfig) -> DatabaseResult<Self> {
        let write_pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect_with(config.connect_options())
            .await
            .map_err(|source| DatabaseError::ConnectionFailed {
                message: "failed to establish write pool".to_string(),
                correlation_id: None,
                source,
            })?;

        let read_max = (config.max_connections / 2).max(1);
        let read_pool = PgPoolOptions::new()
            .max_connections(read_max)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect_with(config.connect_options())
            .await
            .map_err(|source| DatabaseError::ConnectionFailed {
                message: "failed to establish read pool".to_string(),
                correlation_id: None,
                source,
            })?;

        Ok(Self { write_pool, read_pool })
    }

    /// Pool used for inserts/updates: planner writes, chunk leasing,
    /// completion/failure recording, heartbeats.
    #[must_use]
    pub fn write(&self) -> &PgPool {
        &self.write_pool
    }

    /// Pool used for reads that don't need to see the freshest write:
    /// status endpoints, recovery-loop sweeps.
    #[must_use]
    pub fn read(&self) -> &PgPool {
        &self.read_pool
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            write: ConnectionStats {
                size: self.write_pool.size(),
                idle: self.write_pool.num_idle().try_into().unwrap_or(u32::MAX),
            },
            read: ConnectionStats {
                size: self.read_pool.size(),
                idle: self.read_pool.num_idle().try_into().unwrap_or(u32::MAX),
            },
        }
    }

    /// Close both pools, draining in-flight queries first.
    pub async fn close(&self) {
        self.write_pool.close().await;
        self.read_pool.close().await;
    }
}
