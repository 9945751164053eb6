use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the server started.
    #[schema(example = 3600)]
    pub uptime_secs: u64,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ReadyResponse {
    /// `ready`, or `saturated` when the judge queue is full.
    #[schema(example = "ready")]
    pub status: &'static str,
    #[schema(example = 3)]
    pub queued: usize,
    #[schema(example = 256)]
    pub capacity: usize,
    #[schema(example = 4)]
    pub workers: usize,
}
