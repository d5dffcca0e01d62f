//! Postgres `LISTEN`/`NOTIFY`-backed `WorkQueue`.
//!
//! Deliberately not the teacher's `SKIP LOCKED` table-backed queue: that
//! queue is durable and at-least-once, which undersells the "queue is a
//! hint, metadata store is authoritative" invariant this engine actually
//! wants. `PgListener` can genuinely drop a notification (no listener
//! connected at `NOTIFY` time, or the channel buffer overruns), so the
//! recovery loop's orphan sweep stays load-bearing rather than vestigial.

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::trait_def::{WorkHint, WorkQueue};

const CHANNEL: &str = "chunk_available";

/// One `PgNotifyQueue` per process: the `NOTIFY` side shares the caller's
/// pool, the `LISTEN` side owns a single dedicated connection via
/// `PgListener`, wrapped in a `Mutex` since `recv` needs `&mut self`.
pub struct PgNotifyQueue {
    pool: PgPool,
    listener: Mutex<PgListener>,
}

impl PgNotifyQueue {
    /// # Errors
    /// Returns `QueueError::SubscribeFailed` if the dedicated listener
    /// connection cannot be established or `LISTEN` cannot be issued.
    pub async fn connect(pool: PgPool) -> QueueResult<Self> {
        let mut listener = PgListener::connect_with(&pool)
            .await
            .map_err(|source| QueueError::SubscribeFailed { channel: CHANNEL.to_string(), source })?;
        listener
            .listen(CHANNEL)
            .await
            .map_err(|source| QueueError::SubscribeFailed { channel: CHANNEL.to_string(), source })?;

        Ok(Self { pool, listener: Mutex::new(listener) })
    }
}

#[async_trait]
impl WorkQueue for PgNotifyQueue {
    async fn notify_chunks_available(&self, job_id: Uuid) -> QueueResult<()> {
        let hint = WorkHint { job_id };
        let payload = serde_json::to_string(&hint).unwrap_or_default();

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|source| QueueError::NotifyFailed { channel: CHANNEL.to_string(), source })?;

        Ok(())
    }

    async fn recv_hint(&self, timeout: std::time::Duration) -> QueueResult<Option<WorkHint>> {
        let mut listener = self.listener.lock().await;

        match tokio::time::timeout(timeout, listener.recv()).await {
            Ok(Ok(notification)) => {
                let hint: Option<WorkHint> = serde_json::from_str(notification.payload()).ok();
                Ok(hint)
            }
            Ok(Err(source)) => Err(QueueError::ListenerLost { source }),
            Err(_elapsed) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_hint_roundtrip() {
        let hint = WorkHint { job_id: Uuid::new_v4() };
        let json = serde_json::to_string(&hint).unwrap();
        let parsed: WorkHint = serde_json::from_str(&json).unwrap();
        assert_eq!(hint, parsed);
    }
}
