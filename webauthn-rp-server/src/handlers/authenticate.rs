//! Authentication ceremony endpoints

use axum::{extract::State, Json};
use serde::Deserialize;
use webauthn_rp_core::{
    AssertionChallenge, AssertionResponse, AssertionResult, AuthenticationScope,
};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StartAuthenticationRequest {
    /// Omit for a discoverable-credential (username-less) login
    #[serde(default)]
    pub username: Option<String>,
}

/// POST /webauthn/authenticate/start
pub async fn start_authentication(
    State(state): State<AppState>,
    Json(req): Json<StartAuthenticationRequest>,
) -> Result<Json<AssertionChallenge>, ApiError> {
    let scope = match req.username.map(|u| u.trim().to_string()) {
        Some(username) if !username.is_empty() => AuthenticationScope::User(username),
        _ => AuthenticationScope::Discoverable,
    };
    let challenge = state.rp.start_authentication(scope).await?;
    Ok(Json(challenge))
}

/// POST /webauthn/authenticate/finish
pub async fn finish_authentication(
    State(state): State<AppState>,
    Json(req): Json<AssertionResponse>,
) -> Result<Json<AssertionResult>, ApiError> {
    let result = state.rp.finish_authentication(&req).await?;
    Ok(Json(result))
}
