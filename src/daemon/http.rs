//! HTTP surface of the capture daemon

use super::stream::{frame_stream, BOUNDARY};
use super::CaptureDaemon;
use crate::types::Frame;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

const FRAME_SEQUENCE: HeaderName = HeaderName::from_static("x-frame-sequence");

/// Create the daemon router.
///
/// Paths used by older kiosk pages are served as aliases.
pub fn router(daemon: CaptureDaemon) -> Router {
    let cors = cors_layer(&daemon.settings().allowed_origin);

    Router::new()
        .route("/stream", get(stream))
        .route("/camera/stream", get(stream))
        .route("/video_stream", get(stream))
        .route("/snapshot", get(snapshot))
        .route("/camera/snapshot", get(snapshot))
        .route("/health", get(health))
        .route("/camera/health", get(health))
        .layer(cors)
        .with_state(daemon)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if origin.trim() == "*" {
        return cors.allow_origin(Any);
    }
    match HeaderValue::from_str(origin.trim()) {
        Ok(value) => cors.allow_origin(AllowOrigin::exact(value)),
        Err(_) => {
            log::warn!("Ignoring invalid CORS origin {:?}; cross-origin reads disabled", origin);
            cors
        }
    }
}

async fn stream(State(daemon): State<CaptureDaemon>) -> Response {
    let content_type = format!("multipart/x-mixed-replace; boundary={}", BOUNDARY);
    (
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate".to_string(),
            ),
            (header::PRAGMA, "no-cache".to_string()),
        ],
        Body::from_stream(frame_stream(daemon)),
    )
        .into_response()
}

async fn snapshot(State(daemon): State<CaptureDaemon>) -> Response {
    match daemon.snapshot().await {
        Ok(frame) => {
            let filename = format!(
                "snapshot_{}.jpg",
                frame.captured_at.format("%Y%m%d_%H%M%S")
            );
            (
                [
                    (header::CONTENT_TYPE, Frame::CONTENT_TYPE.to_string()),
                    (header::CACHE_CONTROL, "no-store, max-age=0".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("inline; filename={}", filename),
                    ),
                    (FRAME_SEQUENCE, frame.sequence.to_string()),
                ],
                frame.data,
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ok": false,
                "reason": e.reason,
                "error": e.detail,
            })),
        )
            .into_response(),
    }
}

async fn health(State(daemon): State<CaptureDaemon>) -> Response {
    let report = tokio::task::spawn_blocking(move || daemon.health()).await;
    match report {
        Ok(report) => {
            let status = if report.ok {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(report)).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}
