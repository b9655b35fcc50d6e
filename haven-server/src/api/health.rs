//! Health check endpoint

use crate::cleanup::CleanupStats;
use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// "live" or "fallback"
    pub video: String,
    pub cleanup: CleanupStats,
}

/// GET /health
///
/// No authentication.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "haven-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        video: if state.video.is_live() { "live" } else { "fallback" }.to_string(),
        cleanup: state.cleanup.stats(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
