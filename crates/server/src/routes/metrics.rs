// crates/server/src/routes/metrics.rs
//! Prometheus scrape target for the sweep, sync, and job-run metrics.

use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::ErrorResponse;
use crate::metrics::render_metrics;
use crate::state::AppState;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics - 503 with a JSON error until the recorder is installed.
async fn scrape() -> Response {
    let Some(body) = render_metrics() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("Metrics recorder not installed")),
        )
            .into_response();
    };
    ([(header::CONTENT_TYPE, PROMETHEUS_TEXT)], body).into_response()
}

/// Mounted at the root, outside `/api`, where scrapers expect it.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(scrape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use questline_db::Database;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_scrape_includes_sweep_outcomes() {
        crate::metrics::init_metrics();
        metrics::counter!("questline_sweep_sessions_total", "outcome" => "conflict").increment(1);

        let db = Database::new_in_memory().await.unwrap();
        let app = crate::create_app(AppState::new(db));
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], PROMETHEUS_TEXT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#"questline_sweep_sessions_total{outcome="conflict"}"#));
    }

    #[tokio::test]
    async fn test_scrape_is_not_under_api_prefix() {
        let db = Database::new_in_memory().await.unwrap();
        let app = crate::create_app(AppState::new(db));
        let response = app
            .oneshot(Request::builder().uri("/api/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
