//! HTTP surface for the control plane: job lifecycle endpoints backed by
//! the metadata store and work queue (SPEC_FULL.md §6).

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
