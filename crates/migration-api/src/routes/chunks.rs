//! `GET /migrations/{id}/chunks` (SPEC_FULL.md §6).

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use migration_metadata::ChunkStatus;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/migrations/{id}/chunks", get(list_chunks))
}

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChunkDetail {
    pub id: Uuid,
    pub table_name: String,
    pub pk_start: i64,
    pub pk_end: i64,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn list_chunks(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(q): Query<ChunkQuery>,
) -> ApiResult<Json<Vec<ChunkDetail>>> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<ChunkStatus>)
        .transpose()
        .unwrap_or(None);

    let chunks = state.chunks.list_chunks(job_id, status).await?;

    Ok(Json(
        chunks
            .into_iter()
            .map(|c| ChunkDetail {
                id: c.id,
                table_name: c.table_name,
                pk_start: c.pk_start,
                pk_end: c.pk_end,
                status: c.status.to_string(),
                retry_count: c.retry_count,
                max_retries: c.max_retries,
                worker_id: c.worker_id,
                last_error: c.last_error,
                next_retry_at: c.next_retry_at,
            })
            .collect(),
    ))
}
