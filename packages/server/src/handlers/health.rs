use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;

use crate::models::health::{HealthResponse, ReadyResponse};
use crate::state::AppState;

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "health",
    responses(
        (status = 200, description = "Server is running", body = HealthResponse),
    ),
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Readiness probe. Reports 503 while the judge queue is full.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    operation_id = "ready",
    responses(
        (status = 200, description = "Accepting submissions", body = ReadyResponse),
        (status = 503, description = "Judge queue full or closed", body = ReadyResponse),
    ),
)]
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let queue = state.intake.queue();
    let saturated = queue.is_full() || queue.is_closed();
    let status = if saturated {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(ReadyResponse {
            status: if saturated { "saturated" } else { "ready" },
            queued: queue.len(),
            capacity: queue.capacity(),
            workers: state.config.judge.workers,
        }),
    )
}
