//! Credential management endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use webauthn_rp_core::{
    AttestationFormat, AttestationTrust, AuthenticatorTransport, CoseAlgorithm, CredentialId,
    CredentialRegistration,
};

use crate::error::ApiError;
use crate::state::AppState;

/// A registered credential as shown to its owner; the public key is left out.
#[derive(Debug, Serialize)]
pub struct CredentialSummary {
    pub credential_id: CredentialId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub algorithm: CoseAlgorithm,
    pub sign_count: u32,
    pub attestation_format: AttestationFormat,
    pub attestation_trust: AttestationTrust,
    pub transports: Vec<AuthenticatorTransport>,
    pub backup_eligible: bool,
    pub backed_up: bool,
}

impl From<CredentialRegistration> for CredentialSummary {
    fn from(r: CredentialRegistration) -> Self {
        Self {
            credential_id: r.credential_id,
            nickname: r.nickname,
            registered_at: r.registered_at,
            algorithm: r.public_key.algorithm,
            sign_count: r.sign_count,
            attestation_format: r.attestation_format,
            attestation_trust: r.attestation_trust,
            transports: r.transports,
            backup_eligible: r.backup_eligible,
            backed_up: r.backed_up,
        }
    }
}

/// GET /webauthn/registrations/{username}
pub async fn list_registrations(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<CredentialSummary>>, ApiError> {
    let registrations = state.rp.registrations(&username).await?;
    Ok(Json(
        registrations
            .into_iter()
            .map(CredentialSummary::from)
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeregisterRequest {
    pub username: String,
    pub credential_id: CredentialId,
}

#[derive(Debug, Serialize)]
pub struct DeregisterResponse {
    pub removed: CredentialSummary,
}

/// POST /webauthn/deregister
pub async fn deregister(
    State(state): State<AppState>,
    Json(req): Json<DeregisterRequest>,
) -> Result<Json<DeregisterResponse>, ApiError> {
    let removed = state
        .rp
        .deregister(req.username.trim(), &req.credential_id)
        .await?;
    Ok(Json(DeregisterResponse {
        removed: removed.into(),
    }))
}
