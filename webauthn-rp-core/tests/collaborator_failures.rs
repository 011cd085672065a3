//! Failing repository and trust service: errors must surface as
//! `RepositoryUnavailable` / `TrustServiceUnavailable`, the ceremony must be
//! spent and nothing may be committed.

#![cfg(feature = "mock")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use webauthn_rp_core::{
    AttestationCa, AttestationTrustService, AuthenticationScope, AuthenticatorMetadata,
    CeremonyError, CoseAlgorithm, CounterUpdate, CredentialId, CredentialRegistration,
    CredentialRepository, InMemoryCredentialRepository, MockAttestation, RelyingParty,
    RelyingPartyConfig, RepositoryError, RepositoryResult, SoftAuthenticator, TrustError,
    TrustVerdict, UserHandle,
};

const ORIGIN: &str = "https://example.com";

/// In-memory repository whose writes fail while `failing` is set.
#[derive(Default)]
struct FlakyRepository {
    inner: InMemoryCredentialRepository,
    failing: AtomicBool,
}

impl FlakyRepository {
    fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> RepositoryResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RepositoryError::Backend("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialRepository for FlakyRepository {
    async fn lookup_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> RepositoryResult<Option<CredentialRegistration>> {
        self.inner.lookup_by_credential_id(credential_id).await
    }

    async fn lookup_by_user(
        &self,
        user_handle: &UserHandle,
    ) -> RepositoryResult<Vec<CredentialRegistration>> {
        self.inner.lookup_by_user(user_handle).await
    }

    async fn lookup_by_username(
        &self,
        username: &str,
    ) -> RepositoryResult<Vec<CredentialRegistration>> {
        self.inner.lookup_by_username(username).await
    }

    async fn user_handle_for(&self, username: &str) -> RepositoryResult<Option<UserHandle>> {
        self.inner.user_handle_for(username).await
    }

    async fn add(&self, registration: CredentialRegistration) -> RepositoryResult<()> {
        self.check()?;
        self.inner.add(registration).await
    }

    async fn remove(
        &self,
        username: &str,
        credential_id: &CredentialId,
    ) -> RepositoryResult<CredentialRegistration> {
        self.check()?;
        self.inner.remove(username, credential_id).await
    }

    async fn update_counter(
        &self,
        credential_id: &CredentialId,
        expected: u32,
        new: u32,
    ) -> RepositoryResult<CounterUpdate> {
        self.check()?;
        self.inner.update_counter(credential_id, expected, new).await
    }
}

struct UnreachableTrustService;

#[async_trait]
impl AttestationTrustService for UnreachableTrustService {
    async fn evaluate(
        &self,
        _chain: &[Vec<u8>],
        _metadata: &AuthenticatorMetadata,
    ) -> Result<TrustVerdict, TrustError> {
        Err(TrustError::Unavailable("metadata service timed out".into()))
    }
}

fn config() -> RelyingPartyConfig {
    RelyingPartyConfig::new("example.com", "Example", [ORIGIN]).unwrap()
}

fn flaky_relying_party() -> (RelyingParty, Arc<FlakyRepository>) {
    let repo = Arc::new(FlakyRepository::default());
    (RelyingParty::new(config(), repo.clone()), repo)
}

#[tokio::test]
async fn test_repository_failure_on_registration_commits_nothing() {
    let (rp, repo) = flaky_relying_party();
    let mut authenticator = SoftAuthenticator::new();

    let challenge = rp.start_registration_for("alice", "Alice", None).await.unwrap();
    let response = authenticator
        .make_credential(&challenge, ORIGIN, CoseAlgorithm::ES256, MockAttestation::None)
        .unwrap();

    repo.fail_writes(true);
    let err = rp.finish_registration(&response).await.unwrap_err();
    assert!(matches!(err, CeremonyError::RepositoryUnavailable(_)), "{err:?}");
    assert!(err.is_retryable());

    // Ceremony spent, nothing stored
    assert_eq!(rp.ceremony_stats().pending_registrations, 0);
    assert!(repo.inner.is_empty());
    assert!(repo.lookup_by_username("alice").await.unwrap().is_empty());

    repo.fail_writes(false);
    assert!(matches!(
        rp.finish_registration(&response).await,
        Err(CeremonyError::CeremonyNotFound)
    ));
    assert!(repo.inner.is_empty());
}

#[tokio::test]
async fn test_repository_failure_on_counter_update_keeps_counter() {
    let (rp, repo) = flaky_relying_party();
    let mut authenticator = SoftAuthenticator::new();

    let challenge = rp.start_registration_for("alice", "Alice", None).await.unwrap();
    let response = authenticator
        .make_credential(&challenge, ORIGIN, CoseAlgorithm::ES256, MockAttestation::None)
        .unwrap();
    let registered = rp.finish_registration(&response).await.unwrap();
    assert_eq!(registered.sign_count, 0);

    let challenge = rp
        .start_authentication(AuthenticationScope::User("alice".into()))
        .await
        .unwrap();
    let assertion = authenticator.get_assertion(&challenge, ORIGIN).unwrap();

    repo.fail_writes(true);
    let err = rp.finish_authentication(&assertion).await.unwrap_err();
    assert!(matches!(err, CeremonyError::RepositoryUnavailable(_)), "{err:?}");
    assert_eq!(rp.ceremony_stats().pending_authentications, 0);

    let stored = repo
        .lookup_by_credential_id(&registered.credential_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sign_count, 0);

    repo.fail_writes(false);
    assert!(matches!(
        rp.finish_authentication(&assertion).await,
        Err(CeremonyError::CeremonyNotFound)
    ));
}

#[tokio::test]
async fn test_trust_service_failure_rejects_registration() {
    let repo = Arc::new(InMemoryCredentialRepository::new());
    let rp = RelyingParty::new(config(), repo.clone())
        .with_trust_service(Arc::new(UnreachableTrustService));

    let ca = AttestationCa::generate().unwrap();
    let mut authenticator = SoftAuthenticator::new().with_attestation_ca(ca);
    let challenge = rp.start_registration_for("alice", "Alice", None).await.unwrap();
    let response = authenticator
        .make_credential(&challenge, ORIGIN, CoseAlgorithm::ES256, MockAttestation::PackedFull)
        .unwrap();

    let err = rp.finish_registration(&response).await.unwrap_err();
    assert!(matches!(err, CeremonyError::TrustServiceUnavailable(_)), "{err:?}");
    assert_eq!(err.code(), "TRUST_SERVICE_UNAVAILABLE");
    assert_eq!(rp.ceremony_stats().pending_registrations, 0);
    assert!(repo.is_empty());
}

#[tokio::test]
async fn test_trust_service_not_consulted_without_chain() {
    let repo = Arc::new(InMemoryCredentialRepository::new());
    let rp = RelyingParty::new(config(), repo.clone())
        .with_trust_service(Arc::new(UnreachableTrustService));

    let mut authenticator = SoftAuthenticator::new();
    let challenge = rp.start_registration_for("alice", "Alice", None).await.unwrap();
    let response = authenticator
        .make_credential(&challenge, ORIGIN, CoseAlgorithm::EdDSA, MockAttestation::PackedSelf)
        .unwrap();
    assert!(rp.finish_registration(&response).await.is_ok());
    assert_eq!(repo.len(), 1);
}
