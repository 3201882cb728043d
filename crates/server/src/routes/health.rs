// crates/server/src/routes/health.rs
//! Health check endpoint for the API.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use questline_db::SessionCounts;
use serde::Serialize;

use crate::error::ApiResult;
use crate::state::AppState;

/// Response for the health check endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub sync_enabled: bool,
    pub sessions: SessionCountsBody,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct SessionCountsBody {
    pub live: i64,
    pub completed: i64,
    pub unsynced: i64,
}

impl From<SessionCounts> for SessionCountsBody {
    fn from(c: SessionCounts) -> Self {
        Self {
            live: c.live,
            completed: c.completed,
            unsynced: c.unsynced,
        }
    }
}

/// GET /api/health - server status, version, uptime, and session totals.
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let counts = state.db.session_counts().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        sync_enabled: state.sync_enabled,
        sessions: counts.into(),
    }))
}

/// Create the health routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
