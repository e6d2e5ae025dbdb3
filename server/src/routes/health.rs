//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use tumor_triage::backend_name;

use crate::state::{ModelStatus, SharedState};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: ModelStatus,
    pub uptime_seconds: u64,
    pub version: String,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.model_status().await,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: backend_name().to_string(),
        error: state.failure().await,
    })
}
