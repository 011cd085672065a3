use thiserror::Error;

use crate::repository::RepositoryError;
use crate::trust::TrustError;

/// Every way a ceremony can fail.
///
/// Variants are grouped by [`ErrorCategory`] so that a host can choose
/// user-facing messaging and log severity without matching on each kind.
#[derive(Error, Debug)]
pub enum CeremonyError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Client data challenge does not match the pending ceremony")]
    ChallengeMismatch,

    #[error("Client data type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("Origin not allowed: {0}")]
    OriginNotAllowed(String),

    #[error("RP ID hash mismatch: expected {expected}, got {actual}")]
    RpIdMismatch { expected: String, actual: String },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Ceremony not found (unknown, expired or already completed)")]
    CeremonyNotFound,

    #[error("Signature counter regression: stored={stored}, received={received}")]
    CounterRegression { stored: u32, received: u32 },

    #[error("User presence flag not set")]
    UserNotPresent,

    #[error("User verification required but not performed")]
    UserVerificationRequired,

    #[error("Unsupported COSE algorithm: {0}")]
    UnsupportedAlgorithm(i64),

    #[error("Unsupported attestation format: {0}")]
    UnsupportedAttestationFormat(String),

    #[error("Unknown credential: {0}")]
    UnknownCredential(String),

    #[error("Credential not allowed for this ceremony: {0}")]
    CredentialNotAllowed(String),

    #[error("Credential already registered: {0}")]
    CredentialAlreadyRegistered(String),

    #[error("User handle does not match the credential owner")]
    UserHandleMismatch,

    #[error("Attestation is not trusted")]
    UntrustedAttestation,

    #[error("Not registered: {0}")]
    NotRegistered(String),

    #[error("Credential repository unavailable: {0}")]
    RepositoryUnavailable(#[source] RepositoryError),

    #[error("Attestation trust service unavailable: {0}")]
    TrustServiceUnavailable(#[source] TrustError),

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

/// Coarse grouping of [`CeremonyError`] kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Client sent bytes or JSON that could not be decoded
    Protocol,
    /// Ceremony data did not match what the relying party expects
    Validation,
    /// Cryptographic failure or cloned-authenticator indicator
    Security,
    /// Ceremony lifecycle problem (expired, replayed, unknown credential)
    Ceremony,
    /// A collaborator (repository, trust service) failed
    Upstream,
    /// Bug or environment failure inside the engine
    Internal,
}

impl CeremonyError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    pub(crate) fn invalid_signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature(message.into())
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "MALFORMED_INPUT",
            Self::ChallengeMismatch => "CHALLENGE_MISMATCH",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::OriginNotAllowed(_) => "ORIGIN_NOT_ALLOWED",
            Self::RpIdMismatch { .. } => "RP_ID_MISMATCH",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::CeremonyNotFound => "CEREMONY_NOT_FOUND",
            Self::CounterRegression { .. } => "COUNTER_REGRESSION",
            Self::UserNotPresent => "USER_NOT_PRESENT",
            Self::UserVerificationRequired => "USER_VERIFICATION_REQUIRED",
            Self::UnsupportedAlgorithm(_) => "UNSUPPORTED_ALGORITHM",
            Self::UnsupportedAttestationFormat(_) => "UNSUPPORTED_ATTESTATION_FORMAT",
            Self::UnknownCredential(_) => "UNKNOWN_CREDENTIAL",
            Self::CredentialNotAllowed(_) => "CREDENTIAL_NOT_ALLOWED",
            Self::CredentialAlreadyRegistered(_) => "CREDENTIAL_ALREADY_REGISTERED",
            Self::UserHandleMismatch => "USER_HANDLE_MISMATCH",
            Self::UntrustedAttestation => "UNTRUSTED_ATTESTATION",
            Self::NotRegistered(_) => "NOT_REGISTERED",
            Self::RepositoryUnavailable(_) => "REPOSITORY_UNAVAILABLE",
            Self::TrustServiceUnavailable(_) => "TRUST_SERVICE_UNAVAILABLE",
            Self::Unexpected(_) => "UNEXPECTED",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedInput(_)
            | Self::UnsupportedAlgorithm(_)
            | Self::UnsupportedAttestationFormat(_) => ErrorCategory::Protocol,

            Self::ChallengeMismatch
            | Self::TypeMismatch { .. }
            | Self::OriginNotAllowed(_)
            | Self::RpIdMismatch { .. }
            | Self::UserNotPresent
            | Self::UserVerificationRequired
            | Self::CredentialNotAllowed(_)
            | Self::UserHandleMismatch
            | Self::UntrustedAttestation => ErrorCategory::Validation,

            Self::InvalidSignature(_) | Self::CounterRegression { .. } => ErrorCategory::Security,

            Self::CeremonyNotFound
            | Self::UnknownCredential(_)
            | Self::CredentialAlreadyRegistered(_)
            | Self::NotRegistered(_) => ErrorCategory::Ceremony,

            Self::RepositoryUnavailable(_) | Self::TrustServiceUnavailable(_) => {
                ErrorCategory::Upstream
            }

            Self::Unexpected(_) => ErrorCategory::Internal,
        }
    }

    /// Only collaborator failures are worth retrying; everything else is
    /// terminal for the ceremony and the user has to start over.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Upstream
    }

    /// Failures that may indicate an attack and deserve elevated log severity.
    pub fn is_security_event(&self) -> bool {
        self.category() == ErrorCategory::Security
    }
}

impl From<RepositoryError> for CeremonyError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Duplicate(id) => Self::CredentialAlreadyRegistered(id),
            RepositoryError::NotFound(id) => Self::UnknownCredential(id),
            RepositoryError::UserHandleConflict(_) => Self::UserHandleMismatch,
            other @ RepositoryError::Backend(_) => Self::RepositoryUnavailable(other),
        }
    }
}

impl From<TrustError> for CeremonyError {
    fn from(err: TrustError) -> Self {
        Self::TrustServiceUnavailable(err)
    }
}

pub type Result<T> = std::result::Result<T, CeremonyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_kinds_are_flagged() {
        assert!(CeremonyError::invalid_signature("bad").is_security_event());
        assert!(CeremonyError::CounterRegression {
            stored: 5,
            received: 5
        }
        .is_security_event());
        assert!(!CeremonyError::ChallengeMismatch.is_security_event());
    }

    #[test]
    fn test_only_upstream_failures_are_retryable() {
        let repo = CeremonyError::from(RepositoryError::Backend("connection reset".into()));
        assert_eq!(repo.code(), "REPOSITORY_UNAVAILABLE");
        assert!(repo.is_retryable());

        let trust = CeremonyError::from(TrustError::Unavailable("timeout".into()));
        assert!(trust.is_retryable());

        assert!(!CeremonyError::CeremonyNotFound.is_retryable());
        assert!(!CeremonyError::malformed("truncated").is_retryable());
    }

    #[test]
    fn test_repository_duplicate_maps_to_already_registered() {
        let err = CeremonyError::from(RepositoryError::Duplicate("abc".into()));
        assert!(matches!(err, CeremonyError::CredentialAlreadyRegistered(ref id) if id == "abc"));
        assert_eq!(err.category(), ErrorCategory::Ceremony);
    }
}
