//! The work queue: a lossy hint channel that lets idle workers wake up
//! before their next poll interval. Never authoritative — see
//! `migration-metadata` for the durable source of truth.

pub mod error;
pub mod mock;
pub mod pg_notify;
pub mod trait_def;

pub use error::{QueueError, QueueResult};
pub use mock::MockWorkQueue;
pub use pg_notify::PgNotifyQueue;
pub use trait_def::{WorkHint, WorkQueue};
