//! In-memory credential repository
//!
//! Credentials are lost on restart; suitable for development and tests.
//! Maps are always locked in the order users, handles, credentials.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{
    CounterUpdate, CredentialRegistration, CredentialRepository, RepositoryError,
    RepositoryResult,
};
use crate::types::{CredentialId, UserHandle};

struct UserRecord {
    handle: UserHandle,
    credentials: Vec<CredentialId>,
}

#[derive(Default)]
pub struct InMemoryCredentialRepository {
    /// username -> handle and owned credential ids
    users: DashMap<String, UserRecord>,
    /// user handle -> username
    handles: DashMap<UserHandle, String>,
    credentials: DashMap<CredentialId, CredentialRegistration>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored credentials
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    fn collect(&self, ids: &[CredentialId]) -> Vec<CredentialRegistration> {
        ids.iter()
            .filter_map(|id| self.credentials.get(id).map(|entry| entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn lookup_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> RepositoryResult<Option<CredentialRegistration>> {
        Ok(self
            .credentials
            .get(credential_id)
            .map(|entry| entry.value().clone()))
    }

    async fn lookup_by_user(
        &self,
        user_handle: &UserHandle,
    ) -> RepositoryResult<Vec<CredentialRegistration>> {
        let Some(username) = self.handles.get(user_handle).map(|entry| entry.value().clone())
        else {
            return Ok(Vec::new());
        };
        self.lookup_by_username(&username).await
    }

    async fn lookup_by_username(
        &self,
        username: &str,
    ) -> RepositoryResult<Vec<CredentialRegistration>> {
        let ids = self
            .users
            .get(username)
            .map(|user| user.credentials.clone())
            .unwrap_or_default();
        Ok(self.collect(&ids))
    }

    async fn user_handle_for(&self, username: &str) -> RepositoryResult<Option<UserHandle>> {
        Ok(self.users.get(username).map(|user| user.handle.clone()))
    }

    async fn add(&self, registration: CredentialRegistration) -> RepositoryResult<()> {
        let username = registration.username.clone();
        let handle = registration.user_handle.clone();
        let credential_id = registration.credential_id.clone();

        let user = self.users.entry(username.clone());
        if let Entry::Occupied(existing) = &user {
            if existing.get().handle != handle {
                return Err(RepositoryError::UserHandleConflict(username));
            }
        }
        if let Some(owner) = self.handles.get(&handle) {
            if *owner != username {
                return Err(RepositoryError::UserHandleConflict(username));
            }
        }

        match self.credentials.entry(credential_id.clone()) {
            Entry::Occupied(_) => {
                return Err(RepositoryError::Duplicate(credential_id.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(registration);
            }
        }

        self.handles.insert(handle.clone(), username);
        match user {
            Entry::Occupied(mut existing) => existing.get_mut().credentials.push(credential_id),
            Entry::Vacant(slot) => {
                slot.insert(UserRecord {
                    handle,
                    credentials: vec![credential_id],
                });
            }
        }
        Ok(())
    }

    async fn remove(
        &self,
        username: &str,
        credential_id: &CredentialId,
    ) -> RepositoryResult<CredentialRegistration> {
        let not_found = || RepositoryError::NotFound(credential_id.to_string());

        let mut user = self.users.get_mut(username).ok_or_else(not_found)?;
        let position = user
            .credentials
            .iter()
            .position(|id| id == credential_id)
            .ok_or_else(not_found)?;
        let (_, registration) = self.credentials.remove(credential_id).ok_or_else(not_found)?;
        user.credentials.remove(position);
        // The user record and handle stay so the handle is never reassigned
        Ok(registration)
    }

    async fn update_counter(
        &self,
        credential_id: &CredentialId,
        expected: u32,
        new: u32,
    ) -> RepositoryResult<CounterUpdate> {
        let mut entry = self
            .credentials
            .get_mut(credential_id)
            .ok_or_else(|| RepositoryError::NotFound(credential_id.to_string()))?;
        if entry.sign_count != expected {
            return Ok(CounterUpdate::Conflict {
                current: entry.sign_count,
            });
        }
        entry.sign_count = new;
        Ok(CounterUpdate::Updated)
    }
}

impl std::fmt::Debug for InMemoryCredentialRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCredentialRepository")
            .field("users", &self.users.len())
            .field("credentials", &self.credentials.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AttestationFormat, CoseKey};
    use crate::trust::AttestationTrust;
    use chrono::Utc;
    use uuid::Uuid;

    fn registration(username: &str, handle: &UserHandle, id: &[u8]) -> CredentialRegistration {
        CredentialRegistration {
            username: username.to_string(),
            user_handle: handle.clone(),
            nickname: Some("laptop".into()),
            registered_at: Utc::now(),
            credential_id: CredentialId::new(id.to_vec()),
            public_key: CoseKey::ed25519(vec![3; 32]).unwrap(),
            sign_count: 0,
            aaguid: Uuid::nil(),
            attestation_format: AttestationFormat::None,
            attestation_trust: AttestationTrust::None,
            transports: vec![],
            backup_eligible: false,
            backed_up: false,
        }
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let repo = InMemoryCredentialRepository::new();
        let handle = UserHandle::generate();
        repo.add(registration("alice", &handle, b"cred-1")).await.unwrap();
        repo.add(registration("alice", &handle, b"cred-2")).await.unwrap();

        let by_id = repo
            .lookup_by_credential_id(&CredentialId::new(b"cred-1".to_vec()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.username, "alice");
        assert_eq!(repo.lookup_by_user(&handle).await.unwrap().len(), 2);
        assert_eq!(repo.credential_ids("alice").await.unwrap().len(), 2);
        assert_eq!(repo.user_handle_for("alice").await.unwrap(), Some(handle));
        assert!(repo.lookup_by_username("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credential_ids_globally_unique() {
        let repo = InMemoryCredentialRepository::new();
        repo.add(registration("alice", &UserHandle::generate(), b"same"))
            .await
            .unwrap();
        let err = repo
            .add(registration("bob", &UserHandle::generate(), b"same"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
        // bob was not half-created
        assert_eq!(repo.user_handle_for("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_user_handle_conflicts() {
        let repo = InMemoryCredentialRepository::new();
        let handle = UserHandle::generate();
        repo.add(registration("alice", &handle, b"a")).await.unwrap();

        let other_handle = repo
            .add(registration("alice", &UserHandle::generate(), b"b"))
            .await;
        assert!(matches!(other_handle, Err(RepositoryError::UserHandleConflict(_))));

        let stolen_handle = repo.add(registration("mallory", &handle, b"c")).await;
        assert!(matches!(stolen_handle, Err(RepositoryError::UserHandleConflict(_))));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_requires_ownership() {
        let repo = InMemoryCredentialRepository::new();
        let handle = UserHandle::generate();
        let id = CredentialId::new(b"cred".to_vec());
        repo.add(registration("alice", &handle, b"cred")).await.unwrap();

        assert!(matches!(
            repo.remove("bob", &id).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.remove("alice", &CredentialId::new(b"other".to_vec())).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert_eq!(repo.len(), 1);

        repo.remove("alice", &id).await.unwrap();
        assert!(repo.lookup_by_credential_id(&id).await.unwrap().is_none());
        assert!(repo.lookup_by_username("alice").await.unwrap().is_empty());
        // handle survives removal of the last credential
        assert_eq!(repo.user_handle_for("alice").await.unwrap(), Some(handle));
    }

    #[tokio::test]
    async fn test_counter_compare_and_set() {
        let repo = InMemoryCredentialRepository::new();
        let id = CredentialId::new(b"cred".to_vec());
        repo.add(registration("alice", &UserHandle::generate(), b"cred"))
            .await
            .unwrap();

        assert_eq!(repo.update_counter(&id, 0, 5).await.unwrap(), CounterUpdate::Updated);
        assert_eq!(
            repo.update_counter(&id, 0, 6).await.unwrap(),
            CounterUpdate::Conflict { current: 5 }
        );
        assert!(matches!(
            repo.update_counter(&CredentialId::new(b"x".to_vec()), 0, 1).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
