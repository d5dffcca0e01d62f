//! `POST /migrations`, `GET /migrations/{id}`, `POST /migrations/{id}/resume`
//! (SPEC_FULL.md §6).

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use migration_config::DEFAULT_CHUNK_TARGET_ROWS;
use migration_engine::{PgIntrospector, Planner};
use migration_metadata::{ChunkStatus, EndpointConfig, JobStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/migrations", post(create_migration))
        .route("/migrations/{id}", get(get_migration))
        .route("/migrations/{id}/resume", post(resume_migration))
}

#[derive(Debug, Deserialize)]
pub struct CreateMigrationRequest {
    pub source_config: EndpointConfig,
    pub target_config: EndpointConfig,
    #[serde(default)]
    pub chunk_size: Option<i64>,
    #[serde(default)]
    pub failure_threshold_percent: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct CreateMigrationResponse {
    pub job_id: Uuid,
    pub total_tables: i32,
    pub total_chunks: i32,
}

async fn create_migration(
    State(state): State<AppState>,
    Json(req): Json<CreateMigrationRequest>,
) -> ApiResult<Json<CreateMigrationResponse>> {
    let job_id = Uuid::new_v4();
    let failure_threshold = req.failure_threshold_percent.unwrap_or(migration_config::DEFAULT_FAILURE_THRESHOLD_PERCENT);
    state
        .jobs
        .create_job(job_id, &req.source_config, &req.target_config, failure_threshold, req.chunk_size)
        .await?;
    state.jobs.set_job_status(job_id, JobStatus::Planning, None).await?;

    let source_pool = connect(&req.source_config).await?;
    let introspector = std::sync::Arc::new(PgIntrospector::new(source_pool));
    let planner = Planner::new(
        introspector,
        std::sync::Arc::clone(&state.tables),
        std::sync::Arc::clone(&state.chunks),
        std::sync::Arc::clone(&state.jobs),
        std::sync::Arc::clone(&state.queue),
    );

    let target_rows = req.chunk_size.unwrap_or(DEFAULT_CHUNK_TARGET_ROWS as i64);
    let summary = planner
        .plan_job(job_id, target_rows, migration_config::DEFAULT_MAX_RETRIES as i32)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if summary.total_chunks > 0 {
        state.jobs.mark_job_started(job_id).await?;
    }

    Ok(Json(CreateMigrationResponse {
        job_id,
        total_tables: summary.total_tables,
        total_chunks: summary.total_chunks,
    }))
}

#[derive(Debug, Serialize)]
pub struct TableProgress {
    pub table_name: String,
    pub status: String,
    pub completed_chunks: i32,
    pub failed_chunks: i32,
    pub total_chunks: i32,
}

#[derive(Debug, Serialize)]
pub struct MigrationSummary {
    pub job_id: Uuid,
    pub status: String,
    pub total_tables: i32,
    pub total_chunks: i32,
    pub completed_chunks: i32,
    pub failed_chunks: i32,
    pub tables: Vec<TableProgress>,
    pub failed_chunk_ids: Vec<Uuid>,
}

async fn get_migration(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<MigrationSummary>> {
    let job = state.jobs.get_job(id).await?;
    let tables = state.tables.list_tables_for_job(id).await?;
    let failed = state.chunks.list_chunks(id, Some(ChunkStatus::Failed)).await?;

    Ok(Json(MigrationSummary {
        job_id: job.id,
        status: job.status.to_string(),
        total_tables: job.total_tables,
        total_chunks: job.total_chunks,
        completed_chunks: job.completed_chunks,
        failed_chunks: job.failed_chunks,
        tables: tables
            .into_iter()
            .map(|t| TableProgress {
                table_name: t.table_name,
                status: t.status.to_string(),
                completed_chunks: t.completed_chunks,
                failed_chunks: t.failed_chunks,
                total_chunks: t.total_chunks,
            })
            .collect(),
        failed_chunk_ids: failed.into_iter().map(|c| c.id).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ResumeResponse {
    pub resumed_chunks: usize,
}

async fn resume_migration(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ResumeResponse>> {
    let job = state.jobs.get_job(id).await?;
    if job.status == JobStatus::Completed {
        return Err(ApiError::BadRequest("job already completed".to_string()));
    }

    let failed = state.chunks.list_chunks(id, Some(ChunkStatus::Failed)).await?;
    let eligible: Vec<_> = failed.into_iter().filter(|c| c.retry_count < c.max_retries).collect();

    for chunk in &eligible {
        state.chunks.resume_chunk(chunk.id).await?;
    }

    if !eligible.is_empty() {
        if job.status == JobStatus::Failed {
            state.jobs.set_job_status(id, JobStatus::Running, None).await?;
        }
        state.queue.notify_chunks_available(id).await.unwrap_or_else(|e| {
            tracing::warn!(job_id = %id, error = %e, "failed to publish resume hint");
        });
    }

    Ok(Json(ResumeResponse { resumed_chunks: eligible.len() }))
}

async fn connect(endpoint: &EndpointConfig) -> ApiResult<sqlx::PgPool> {
    let url = format!(
        "postgres://{}:{}@{}:{}/{}",
        endpoint.username, endpoint.password, endpoint.host, endpoint.port, endpoint.database
    );
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to connect to source: {e}")))
}
