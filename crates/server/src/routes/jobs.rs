// crates/server/src/routes/jobs.rs
//! API routes for the reconciliation jobs.
//!
//! - GET /jobs - Recent and running job runs, newest first
//! - GET /jobs/stream - SSE stream of job progress updates
//! - POST /jobs/{job_type}/run - Start a run now unless one is in progress

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use questline_server_jobs::{JobId, JobProgress};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct TriggerResponse {
    pub job_id: JobId,
    pub job_type: String,
}

/// GET /api/jobs - List tracked job runs.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobProgress>> {
    Json(state.jobs.list_jobs())
}

/// GET /api/jobs/stream - SSE stream of all job progress updates.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.jobs.subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(progress) => {
                    let json = serde_json::to_string(&progress).unwrap_or_default();
                    yield Ok(Event::default().event("progress").data(json));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Job progress subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /api/jobs/{job_type}/run - Start a run now.
async fn trigger_job(
    State(state): State<Arc<AppState>>,
    Path(job_type): Path<String>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    let trigger = state
        .triggers
        .get(job_type.as_str())
        .ok_or_else(|| ApiError::UnknownJob(job_type.clone()))?;
    let handle = trigger
        .trigger()
        .ok_or_else(|| ApiError::JobBusy(job_type.clone()))?;

    tracing::info!(job_type = %job_type, job_id = handle.id, "Job triggered via API");
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            job_id: handle.id,
            job_type,
        }),
    ))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/stream", get(stream_jobs))
        .route("/jobs/{job_type}/run", post(trigger_job))
}
