//! WebAuthn Relying Party - ceremony engine for passkey registration and login
//!
//! This crate implements the server side of the WebAuthn (FIDO2) registration
//! and authentication ceremonies: challenge issuance, CBOR/COSE decoding,
//! attestation and assertion verification, and signature counter tracking.
//! Storage and attestation trust decisions are injected through traits so the
//! engine itself holds only short-lived ceremony state.
//!
//! # Features
//!
//! - ES256, EdDSA (Ed25519) and RS256 credential keys
//! - `none`, `packed` (self and full) and `fido-u2f` attestation
//! - Single-use, expiring challenges
//! - Strict or lenient signature counter policy
//! - `mock` (off by default): a software authenticator for tests and demos
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webauthn_rp_core::{
//!     AuthenticationScope, InMemoryCredentialRepository, RelyingParty, RelyingPartyConfig,
//! };
//!
//! # async fn example() -> webauthn_rp_core::Result<()> {
//! let config = RelyingPartyConfig::new("example.com", "Example", ["https://example.com"])
//!     .expect("valid config");
//! let rp = RelyingParty::new(config, Arc::new(InMemoryCredentialRepository::new()));
//!
//! // Send `challenge.public_key` to navigator.credentials.create()
//! let challenge = rp.start_registration_for("alice", "Alice", None).await?;
//! # let _ = challenge;
//!
//! // ...and later, for login
//! let challenge = rp
//!     .start_authentication(AuthenticationScope::User("alice".into()))
//!     .await?;
//! # let _ = challenge;
//! # Ok(())
//! # }
//! ```

pub mod assertion;
pub mod attestation;
pub mod ceremony;
pub mod client_data;
pub mod codec;
pub mod config;
pub mod error;
pub mod relying_party;
pub mod repository;
pub mod trust;
pub mod types;
pub mod wire;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// The only credential type WebAuthn defines
pub const PUBLIC_KEY_CREDENTIAL_TYPE: &str = "public-key";

// Re-export main types for convenience
pub use assertion::{evaluate_counter, AssertionVerifier, CounterOutcome, VerifiedAssertion};
pub use attestation::{AttestationVerifier, VerifiedRegistration};
pub use ceremony::{CeremonyKind, CeremonyStats, CeremonyStore};
pub use client_data::{ClientData, ClientDataType, CollectedClientData};
pub use codec::{
    AttestationFormat, AttestationObject, AttestedCredentialData, AuthenticatorData,
    AuthenticatorFlags, CoseAlgorithm, CoseKey, CoseKeyParams,
};
pub use config::{
    AttestationPolicy, ConfigError, CounterPolicy, RelyingPartyConfig, UserVerificationPolicy,
};
pub use error::{CeremonyError, ErrorCategory, Result};
pub use relying_party::{AssertionResult, AuthenticationScope, RegistrationResult, RelyingParty};
pub use repository::{
    CounterUpdate, CredentialRegistration, CredentialRepository, InMemoryCredentialRepository,
    RepositoryError, RepositoryResult,
};
pub use trust::{
    AttestationTrust, AttestationTrustService, AuthenticatorMetadata, DeviceModel,
    MetadataTrustService, TrustError, TrustVerdict,
};
pub use types::{
    AuthenticatorTransport, CredentialDescriptor, CredentialId, RelyingPartyIdentity, UserHandle,
    UserIdentity,
};
pub use wire::{
    AssertionChallenge, AssertionCredential, AssertionResponse, AuthenticatorAssertionResponse,
    AuthenticatorAttestationResponse, PublicKeyCredential, RegistrationChallenge,
    RegistrationCredential, RegistrationResponse,
};

#[cfg(any(test, feature = "mock"))]
pub use mock::{AttestationCa, MockAttestation, SoftAuthenticator};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Register a passkey and sign in with it.
    #[tokio::test]
    async fn test_full_ceremony_workflow() {
        let config =
            RelyingPartyConfig::new("example.com", "Example", ["https://example.com"]).unwrap();
        let rp = RelyingParty::new(config, Arc::new(InMemoryCredentialRepository::new()));
        let mut authenticator = SoftAuthenticator::new();

        // Step 1: Registration
        let challenge = rp.start_registration_for("alice", "Alice", None).await.unwrap();
        let response = authenticator
            .make_credential(
                &challenge,
                "https://example.com",
                CoseAlgorithm::ES256,
                MockAttestation::None,
            )
            .unwrap();
        let registered = rp.finish_registration(&response).await.unwrap();
        assert_eq!(registered.username, "alice");
        assert_eq!(registered.trust, AttestationTrust::None);

        // Step 2: Authentication
        let challenge = rp
            .start_authentication(AuthenticationScope::User("alice".into()))
            .await
            .unwrap();
        let assertion = authenticator
            .get_assertion(&challenge, "https://example.com")
            .unwrap();
        let result = rp.finish_authentication(&assertion).await.unwrap();
        assert_eq!(result.credential_id, registered.credential_id);
        assert_eq!(result.sign_count, 1);
        assert!(!result.counter_regressed);
    }
}
