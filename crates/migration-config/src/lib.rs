//! Configuration for the migration engine.
//!
//! Configuration follows a simple hierarchy:
//! 1. Safe defaults (compiled in as `DEFAULT_*` constants)
//! 2. Environment variable overrides
//! 3. Runtime validation (`Validate`)

pub mod error;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use validation::Validate;

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---- Defaults, per SPEC_FULL.md §6 -----------------------------------

pub const DEFAULT_CHUNK_TARGET_ROWS: u64 = 100_000;
pub const DEFAULT_BATCH_SIZE: u64 = 5_000;
pub const DEFAULT_BATCH_MIN: u64 = 1_000;
pub const DEFAULT_BATCH_MAX: u64 = 50_000;
pub const DEFAULT_BATCH_TARGET_LATENCY_MS: u64 = 500;

pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_STALE_HEARTBEAT_SECONDS: u64 = 120;
pub const DEFAULT_RECOVERY_INTERVAL_SECONDS: u64 = 30;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_FAILURE_THRESHOLD_PERCENT: f64 = 50.0;

pub const DEFAULT_QUEUE_POLL_TIMEOUT_SECONDS: u64 = 5;

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "migration_engine";
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_DB_PASSWORD: &str = "postgres";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DB_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_DB_IDLE_TIMEOUT_SECONDS: u64 = 600;

pub const DEFAULT_API_HOST: &str = "0.0.0.0";
pub const DEFAULT_API_PORT: u16 = 8090;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

// ---- Chunking / batching ----------------------------------------------

/// Controls how the planner divides a table's PK space into chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    pub target_rows_per_chunk: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_rows_per_chunk: DEFAULT_CHUNK_TARGET_ROWS,
        }
    }
}

impl ChunkingConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            target_rows_per_chunk: env_or("CHUNK_TARGET_ROWS", DEFAULT_CHUNK_TARGET_ROWS),
        }
    }
}

impl Validate for ChunkingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(self.target_rows_per_chunk, 1, 100_000_000, "target_rows_per_chunk")
    }
}

/// Controls the executor's streamed-copy batch size and its adaptive bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    pub batch_size: u64,
    pub batch_min: u64,
    pub batch_max: u64,
    pub target_latency_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_min: DEFAULT_BATCH_MIN,
            batch_max: DEFAULT_BATCH_MAX,
            target_latency_ms: DEFAULT_BATCH_TARGET_LATENCY_MS,
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            batch_size: env_or("BATCH_SIZE", DEFAULT_BATCH_SIZE),
            batch_min: env_or("BATCH_MIN", DEFAULT_BATCH_MIN),
            batch_max: env_or("BATCH_MAX", DEFAULT_BATCH_MAX),
            target_latency_ms: env_or("BATCH_TARGET_LATENCY_MS", DEFAULT_BATCH_TARGET_LATENCY_MS),
        }
    }
}

impl Validate for BatchConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(self.batch_size, 1, 1_000_000, "batch_size")?;
        validation::validate_ordered(self.batch_min, self.batch_size, "batch_min", "batch_size")?;
        validation::validate_ordered(self.batch_size, self.batch_max, "batch_size", "batch_max")?;
        validation::validate_range(self.target_latency_ms, 1, 3_600_000, "target_latency_ms")
    }
}

// ---- Heartbeat / recovery timing --------------------------------------

/// Controls heartbeat cadence, staleness threshold, and recovery-loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    pub heartbeat_interval_seconds: u64,
    pub stale_heartbeat_seconds: u64,
    pub recovery_interval_seconds: u64,
    pub queue_poll_timeout_seconds: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            stale_heartbeat_seconds: DEFAULT_STALE_HEARTBEAT_SECONDS,
            recovery_interval_seconds: DEFAULT_RECOVERY_INTERVAL_SECONDS,
            queue_poll_timeout_seconds: DEFAULT_QUEUE_POLL_TIMEOUT_SECONDS,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            heartbeat_interval_seconds: env_or(
                "HEARTBEAT_INTERVAL_SECONDS",
                DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            ),
            stale_heartbeat_seconds: env_or(
                "STALE_HEARTBEAT_SECONDS",
                DEFAULT_STALE_HEARTBEAT_SECONDS,
            ),
            recovery_interval_seconds: env_or(
                "RECOVERY_INTERVAL_SECONDS",
                DEFAULT_RECOVERY_INTERVAL_SECONDS,
            ),
            queue_poll_timeout_seconds: env_or(
                "QUEUE_POLL_TIMEOUT_SECONDS",
                DEFAULT_QUEUE_POLL_TIMEOUT_SECONDS,
            ),
        }
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    #[must_use]
    pub const fn stale_heartbeat(&self) -> Duration {
        Duration::from_secs(self.stale_heartbeat_seconds)
    }

    #[must_use]
    pub const fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_seconds)
    }

    #[must_use]
    pub const fn queue_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_poll_timeout_seconds)
    }
}

impl Validate for TimingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(self.heartbeat_interval_seconds, 1, 3600, "heartbeat_interval_seconds")?;
        validation::validate_ordered(
            self.heartbeat_interval_seconds,
            self.stale_heartbeat_seconds,
            "heartbeat_interval_seconds",
            "stale_heartbeat_seconds",
        )?;
        validation::validate_range(self.recovery_interval_seconds, 1, 3600, "recovery_interval_seconds")?;
        validation::validate_range(
            self.queue_poll_timeout_seconds,
            1,
            3600,
            "queue_poll_timeout_seconds",
        )
    }
}

// ---- Retry / circuit breaker ------------------------------------------

/// Controls per-chunk retry caps and the job-level failure-rate circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub failure_threshold_percent: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            failure_threshold_percent: DEFAULT_FAILURE_THRESHOLD_PERCENT,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_retries: env_or("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            failure_threshold_percent: env_or(
                "FAILURE_THRESHOLD_PERCENT",
                DEFAULT_FAILURE_THRESHOLD_PERCENT,
            ),
        }
    }
}

impl Validate for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(u64::from(self.max_retries), 0, 100, "max_retries")?;
        if !(0.0..=100.0).contains(&self.failure_threshold_percent) {
            return Err(ConfigError::OutOfRange {
                field: "failure_threshold_percent".to_string(),
                value: self.failure_threshold_percent as u64,
                min: 0,
                max: 100,
            });
        }
        Ok(())
    }
}

// ---- Database (metadata store) ----------------------------------------

/// Connection details for the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            database: DEFAULT_DB_NAME.to_string(),
            username: DEFAULT_DB_USER.to_string(),
            password: DEFAULT_DB_PASSWORD.to_string(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            connect_timeout_seconds: DEFAULT_DB_CONNECT_TIMEOUT_SECONDS,
            idle_timeout_seconds: DEFAULT_DB_IDLE_TIMEOUT_SECONDS,
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn from_env() -> Self {
        if std::env::var("MIGRATION_DATABASE_PASSWORD").is_err()
            && std::env::var("DATABASE_URL").is_err()
        {
            tracing::warn!(
                "MIGRATION_DATABASE_PASSWORD not set; falling back to the compiled-in default. \
                 Do not use this outside local development."
            );
        }

        Self {
            host: env_string_or("MIGRATION_DATABASE_HOST", DEFAULT_DB_HOST),
            port: env_or("MIGRATION_DATABASE_PORT", DEFAULT_DB_PORT),
            database: env_string_or("MIGRATION_DATABASE_NAME", DEFAULT_DB_NAME),
            username: env_string_or("MIGRATION_DATABASE_USER", DEFAULT_DB_USER),
            password: env_string_or("MIGRATION_DATABASE_PASSWORD", DEFAULT_DB_PASSWORD),
            max_connections: env_or("MIGRATION_DATABASE_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            min_connections: env_or("MIGRATION_DATABASE_MIN_CONNECTIONS", DEFAULT_DB_MIN_CONNECTIONS),
            connect_timeout_seconds: env_or(
                "MIGRATION_DATABASE_CONNECT_TIMEOUT_SECONDS",
                DEFAULT_DB_CONNECT_TIMEOUT_SECONDS,
            ),
            idle_timeout_seconds: env_or(
                "MIGRATION_DATABASE_IDLE_TIMEOUT_SECONDS",
                DEFAULT_DB_IDLE_TIMEOUT_SECONDS,
            ),
        }
    }

    /// Connection string with the password redacted, safe to log.
    #[must_use]
    pub fn safe_connection_string(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    #[must_use]
    pub fn connect_options(&self) -> sqlx::postgres::PgConnectOptions {
        sqlx::postgres::PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_non_empty(&self.host, "host")?;
        validation::validate_non_empty(&self.database, "database")?;
        validation::validate_ordered(
            u64::from(self.min_connections),
            u64::from(self.max_connections),
            "min_connections",
            "max_connections",
        )?;
        validation::validate_range(u64::from(self.max_connections), 1, 1000, "max_connections")
    }
}

// ---- Control-plane API --------------------------------------------------

/// Bind address for the control-plane HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_API_HOST.to_string(),
            port: DEFAULT_API_PORT,
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            host: env_string_or("MIGRATION_API_HOST", DEFAULT_API_HOST),
            port: env_or("MIGRATION_API_PORT", DEFAULT_API_PORT),
        }
    }
}

impl Validate for ApiConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_non_empty(&self.host, "host")?;
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port".to_string(),
                value: "0".to_string(),
                reason: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}

// ---- Top-level composed config ------------------------------------------

/// Full configuration for a control-plane or worker process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub chunking: ChunkingConfig,
    pub batch: BatchConfig,
    pub timing: TimingConfig,
    pub retry: RetryConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            batch: BatchConfig::default(),
            timing: TimingConfig::default(),
            retry: RetryConfig::default(),
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            chunking: ChunkingConfig::from_env(),
            batch: BatchConfig::from_env(),
            timing: TimingConfig::from_env(),
            retry: RetryConfig::from_env(),
            database: DatabaseConfig::from_env(),
            api: ApiConfig::from_env(),
        }
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.chunking.validate()?;
        self.batch.validate()?;
        self.timing.validate()?;
        self.retry.validate()?;
        self.database.validate()?;
        self.api.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_batch_min_greater_than_max_rejected() {
        let mut cfg = BatchConfig::default();
        cfg.batch_min = cfg.batch_max + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_stale_threshold() {
        let mut cfg = TimingConfig::default();
        cfg.heartbeat_interval_seconds = cfg.stale_heartbeat_seconds + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_failure_threshold_out_of_range_rejected() {
        let mut cfg = RetryConfig::default();
        cfg.failure_threshold_percent = 150.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_database_min_greater_than_max_rejected() {
        let mut cfg = DatabaseConfig::default();
        cfg.min_connections = cfg.max_connections + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_safe_connection_string_redacts_password() {
        let cfg = DatabaseConfig {
            password: "super-secret".to_string(),
            ..DatabaseConfig::default()
        };
        let safe = cfg.safe_connection_string();
        assert!(!safe.contains("super-secret"));
        assert!(safe.contains("***"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let cfg = EngineConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn test_api_port_zero_rejected() {
        let cfg = ApiConfig { port: 0, ..ApiConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
