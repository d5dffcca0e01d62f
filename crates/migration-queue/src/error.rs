//! Errors for the work queue. Kept small and distinct from
//! `migration-metadata::DatabaseError` since the queue is a hint, not a
//! source of truth — a queue failure should degrade to polling, not
//! propagate as a fatal metadata-store error.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to notify channel {channel}: {source}")]
    NotifyFailed { channel: String, #[source] source: sqlx::Error },

    #[error("failed to subscribe to channel {channel}: {source}")]
    SubscribeFailed { channel: String, #[source] source: sqlx::Error },

    #[error("listener connection lost: {source}")]
    ListenerLost { #[source] source: sqlx::Error },
}
