//! In-memory `WorkQueue` for tests — a `tokio::sync::mpsc` channel instead
//! of Postgres `LISTEN`/`NOTIFY`, with the same lossy-by-design contract:
//! sending into a full or closed channel is swallowed, not propagated.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::QueueResult;
use crate::trait_def::{WorkHint, WorkQueue};

pub struct MockWorkQueue {
    tx: mpsc::Sender<WorkHint>,
    rx: Mutex<mpsc::Receiver<WorkHint>>,
}

impl MockWorkQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self { tx, rx: Mutex::new(rx) }
    }
}

impl Default for MockWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for MockWorkQueue {
    async fn notify_chunks_available(&self, job_id: Uuid) -> QueueResult<()> {
        let _ = self.tx.try_send(WorkHint { job_id });
        Ok(())
    }

    async fn recv_hint(&self, timeout: std::time::Duration) -> QueueResult<Option<WorkHint>> {
        let mut rx = self.rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(tokio::time::timeout(timeout, rx.recv()).await.ok().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notify_then_recv() {
        let queue = MockWorkQueue::new();
        let job_id = Uuid::new_v4();
        queue.notify_chunks_available(job_id).await.unwrap();
        let hint = queue.recv_hint(Duration::from_millis(50)).await.unwrap();
        assert_eq!(hint, Some(WorkHint { job_id }));
    }

    #[tokio::test]
    async fn test_recv_times_out_when_empty() {
        let queue = MockWorkQueue::new();
        let hint = queue.recv_hint(Duration::from_millis(20)).await.unwrap();
        assert_eq!(hint, None);
    }
}
