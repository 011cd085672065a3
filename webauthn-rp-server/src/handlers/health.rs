//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;
use webauthn_rp_core::CeremonyStats;

use crate::state::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Server version from Cargo.toml
    pub version: &'static str,
    pub service: &'static str,
    pub rp_id: String,
    /// Ceremonies started but not yet finished or evicted
    pub ceremonies: CeremonyStats,
}

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "webauthn-rp-server",
        rp_id: state.rp.config().rp_id().to_string(),
        ceremonies: state.rp.ceremony_stats(),
    })
}
