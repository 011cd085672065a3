//! API error handling module
//!
//! Maps ceremony failures onto HTTP status codes and a `{error, code}` JSON
//! body, logging each at a severity matching its category.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use webauthn_rp_core::{CeremonyError, ErrorCategory};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Ceremony error from the relying-party engine
    #[error(transparent)]
    Ceremony(#[from] CeremonyError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Ceremony(e) => match e {
                CeremonyError::CeremonyNotFound => StatusCode::BAD_REQUEST,
                CeremonyError::UnknownCredential(_) => StatusCode::UNAUTHORIZED,
                CeremonyError::CredentialAlreadyRegistered(_) => StatusCode::CONFLICT,
                CeremonyError::NotRegistered(_) => StatusCode::NOT_FOUND,
                other => match other.category() {
                    ErrorCategory::Protocol | ErrorCategory::Ceremony => StatusCode::BAD_REQUEST,
                    ErrorCategory::Validation | ErrorCategory::Security => {
                        StatusCode::UNAUTHORIZED
                    }
                    ErrorCategory::Upstream => StatusCode::SERVICE_UNAVAILABLE,
                    ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                },
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Ceremony(e) => e.code(),
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Ceremony(e) => match e.category() {
                ErrorCategory::Security => "Authentication failed".to_string(),
                ErrorCategory::Upstream => "Upstream service unavailable".to_string(),
                ErrorCategory::Internal => "Internal error".to_string(),
                _ => e.to_string(),
            },
            Self::BadRequest(_) => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        let security = matches!(&self, Self::Ceremony(e) if e.is_security_event());
        if status.is_server_error() || security {
            tracing::error!(
                status = %status,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceremony_status_mapping() {
        let cases = [
            (CeremonyError::CeremonyNotFound, StatusCode::BAD_REQUEST),
            (CeremonyError::ChallengeMismatch, StatusCode::UNAUTHORIZED),
            (
                CeremonyError::CounterRegression { stored: 4, received: 2 },
                StatusCode::UNAUTHORIZED,
            ),
            (
                CeremonyError::NotRegistered("alice".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                CeremonyError::CredentialAlreadyRegistered("AQID".into()),
                StatusCode::CONFLICT,
            ),
            (
                CeremonyError::MalformedInput("truncated".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code(), status);
        }
    }

    #[test]
    fn test_collaborator_failures_are_unavailable() {
        let error = ApiError::from(CeremonyError::from(
            webauthn_rp_core::RepositoryError::Backend("pool exhausted".into()),
        ));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.error_code(), "REPOSITORY_UNAVAILABLE");
        assert_eq!(error.client_message(), "Upstream service unavailable");

        let error = ApiError::bad_request("username is required");
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.client_message(), "Bad request: username is required");
    }

    #[test]
    fn test_security_failures_are_not_detailed() {
        let error = ApiError::from(CeremonyError::InvalidSignature("ecdsa".into()));
        assert_eq!(error.client_message(), "Authentication failed");
        assert_eq!(error.error_code(), "INVALID_SIGNATURE");
    }
}
