//! Registration ceremony endpoints

use axum::{extract::State, Json};
use serde::Deserialize;
use webauthn_rp_core::{RegistrationChallenge, RegistrationResponse, RegistrationResult};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRegistrationRequest {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Label for the new credential, e.g. "work laptop"
    #[serde(default)]
    pub nickname: Option<String>,
}

/// POST /webauthn/register/start
///
/// Returns the request id and the options for `navigator.credentials.create()`.
pub async fn start_registration(
    State(state): State<AppState>,
    Json(req): Json<StartRegistrationRequest>,
) -> Result<Json<RegistrationChallenge>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(ApiError::bad_request("username is required"));
    }
    let display_name = req.display_name.as_deref().unwrap_or(username);

    let challenge = state
        .rp
        .start_registration_for(username, display_name, req.nickname)
        .await?;
    Ok(Json(challenge))
}

/// POST /webauthn/register/finish
///
/// Request body is the request id plus the browser's `PublicKeyCredential`.
pub async fn finish_registration(
    State(state): State<AppState>,
    Json(req): Json<RegistrationResponse>,
) -> Result<Json<RegistrationResult>, ApiError> {
    let result = state.rp.finish_registration(&req).await?;
    Ok(Json(result))
}
