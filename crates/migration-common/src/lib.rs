//! Cross-cutting building blocks shared by every crate in the migration engine.

pub mod error;
pub mod init;
pub mod tracing_ctx;

pub use error::{CommonError, ErrorContext};
pub use init::initialize_environment;
pub use tracing_ctx::CorrelationId;
