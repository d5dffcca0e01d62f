pub mod chunks;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(jobs::routes())
        .merge(chunks::routes())
        .with_state(state)
}
