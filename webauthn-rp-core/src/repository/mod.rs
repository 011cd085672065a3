//! Credential repository interface
//!
//! The engine does not own persistence. Hosts hand it an implementation of
//! [`CredentialRepository`]; [`InMemoryCredentialRepository`] is the reference
//! implementation used by tests and the demo server.

mod memory;

pub use memory::InMemoryCredentialRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{AttestationFormat, CoseKey};
use crate::trust::AttestationTrust;
use crate::types::{AuthenticatorTransport, CredentialId, UserHandle};

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Credential already exists: {0}")]
    Duplicate(String),

    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("User handle conflict for {0}")]
    UserHandleConflict(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// A credential bound to a user, as committed by a successful registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRegistration {
    pub username: String,
    pub user_handle: UserHandle,
    pub nickname: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub credential_id: CredentialId,
    pub public_key: CoseKey,
    /// Last signature counter seen; 0 for authenticators without a counter
    pub sign_count: u32,
    pub aaguid: Uuid,
    pub attestation_format: AttestationFormat,
    pub attestation_trust: AttestationTrust,
    #[serde(default)]
    pub transports: Vec<AuthenticatorTransport>,
    pub backup_eligible: bool,
    pub backed_up: bool,
}

/// Outcome of a compare-and-set counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    Updated,
    /// The stored counter was not the expected one; it is now `current`
    Conflict { current: u32 },
}

/// Storage for credential registrations.
///
/// Implementations must be thread-safe (`Send + Sync`). Credential ids are
/// unique across all users, and `update_counter` must be atomic per
/// credential.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn lookup_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> RepositoryResult<Option<CredentialRegistration>>;

    /// All credentials owned by the user with this handle.
    async fn lookup_by_user(
        &self,
        user_handle: &UserHandle,
    ) -> RepositoryResult<Vec<CredentialRegistration>>;

    async fn lookup_by_username(
        &self,
        username: &str,
    ) -> RepositoryResult<Vec<CredentialRegistration>>;

    /// The handle assigned to `username` by an earlier registration.
    async fn user_handle_for(&self, username: &str) -> RepositoryResult<Option<UserHandle>>;

    /// Credential ids registered to `username`.
    async fn credential_ids(&self, username: &str) -> RepositoryResult<Vec<CredentialId>> {
        Ok(self
            .lookup_by_username(username)
            .await?
            .into_iter()
            .map(|registration| registration.credential_id)
            .collect())
    }

    /// Insert a new registration. Fails with `Duplicate` if the credential id
    /// is taken and `UserHandleConflict` if the username and handle disagree
    /// with earlier registrations.
    async fn add(&self, registration: CredentialRegistration) -> RepositoryResult<()>;

    /// Remove a credential owned by `username`. `NotFound` when the user has
    /// no such credential; nothing is changed in that case.
    async fn remove(
        &self,
        username: &str,
        credential_id: &CredentialId,
    ) -> RepositoryResult<CredentialRegistration>;

    /// Set the counter to `new` only if it currently equals `expected`.
    async fn update_counter(
        &self,
        credential_id: &CredentialId,
        expected: u32,
        new: u32,
    ) -> RepositoryResult<CounterUpdate>;
}
