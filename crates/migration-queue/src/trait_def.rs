//! The work queue contract: a lossy hint channel, never the source of
//! truth for what work exists (SPEC_FULL.md §4.2, §9 — metadata store owns
//! that). Losing a hint must never lose work; it only makes a worker wait
//! out its next poll interval instead of waking immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::QueueResult;

/// A hint that new lease-eligible chunks may exist for a job. Carries no
/// chunk-level detail — the receiver still calls `ChunkRepository::lease_chunk`
/// to find out what, if anything, is actually available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkHint {
    pub job_id: Uuid,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish a hint that `job_id` has new lease-eligible work. Best
    /// effort: a failure here should be logged and swallowed by the
    /// caller, never treated as a reason to fail the triggering operation.
    async fn notify_chunks_available(&self, job_id: Uuid) -> QueueResult<()>;

    /// Wait up to `timeout` for the next hint. Returns `Ok(None)` on
    /// timeout, which is the expected, common case — the caller should
    /// fall back to its own poll interval, not treat it as an error.
    async fn recv_hint(&self, timeout: Duration) -> QueueResult<Option<WorkHint>>;
}
