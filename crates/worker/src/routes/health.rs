//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::WorkerInfo;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub consumer_groups: Vec<String>,
}

/// GET /health: reports the storage backend and running consumer groups.
pub async fn check(State(info): State<WorkerInfo>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        store: info.store,
        consumer_groups: info.consumer_groups,
    })
}
