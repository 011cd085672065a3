//! Pending ceremony store
//!
//! Each `start*` call records a random challenge together with the context
//! needed to finish the ceremony, keyed by an unguessable request id. Entries
//! are consumed exactly once: `consume` removes before it looks at the entry,
//! so a replayed or concurrent second finish always sees `CeremonyNotFound`.
//! Expired entries behave exactly like missing ones, whether or not the
//! periodic eviction has reached them yet.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;

use crate::config::{
    DEFAULT_CEREMONY_TTL, DEFAULT_CHALLENGE_LEN, MAX_CEREMONY_TTL, MIN_CHALLENGE_LEN,
};
use crate::error::{CeremonyError, Result};
use crate::types::{CredentialId, UserIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

/// What a registration ceremony needs to remember between start and finish.
#[derive(Debug, Clone)]
pub struct RegistrationContext {
    pub user: UserIdentity,
    pub nickname: Option<String>,
    /// Credential ids the new credential must not collide with
    pub exclude_credentials: Vec<CredentialId>,
}

#[derive(Debug, Clone)]
pub struct AuthenticationContext {
    /// `None` for discoverable (username-less) authentication
    pub username: Option<String>,
    /// Empty means any credential of any user
    pub allow_credentials: Vec<CredentialId>,
}

#[derive(Debug, Clone)]
pub enum CeremonyContext {
    Registration(RegistrationContext),
    Authentication(AuthenticationContext),
}

impl CeremonyContext {
    pub fn kind(&self) -> CeremonyKind {
        match self {
            Self::Registration(_) => CeremonyKind::Registration,
            Self::Authentication(_) => CeremonyKind::Authentication,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CeremonyRequest {
    pub request_id: String,
    pub challenge: Vec<u8>,
    pub context: CeremonyContext,
    pub created_at: DateTime<Utc>,
}

struct PendingCeremony {
    request: CeremonyRequest,
    expires_at: Instant,
}

/// Store statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CeremonyStats {
    pub pending_registrations: usize,
    pub pending_authentications: usize,
}

/// Thread-safe store of in-flight ceremonies.
pub struct CeremonyStore {
    pending: DashMap<String, PendingCeremony>,
    ttl: Duration,
    challenge_len: usize,
}

impl Default for CeremonyStore {
    fn default() -> Self {
        Self::new(DEFAULT_CEREMONY_TTL, DEFAULT_CHALLENGE_LEN)
    }
}

impl CeremonyStore {
    /// A zero `ttl` makes every ceremony expire immediately; anything above
    /// [`MAX_CEREMONY_TTL`] is clamped to it.
    pub fn new(ttl: Duration, challenge_len: usize) -> Self {
        Self {
            pending: DashMap::new(),
            ttl: ttl.min(MAX_CEREMONY_TTL),
            challenge_len: challenge_len.max(MIN_CHALLENGE_LEN),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh challenge and record the ceremony.
    pub fn start(&self, context: CeremonyContext) -> CeremonyRequest {
        let mut challenge = vec![0u8; self.challenge_len];
        OsRng.fill_bytes(&mut challenge);

        loop {
            let request_id = uuid::Uuid::new_v4().to_string();
            match self.pending.entry(request_id.clone()) {
                // A v4 collision is practically impossible; draw again rather than overwrite
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let request = CeremonyRequest {
                        request_id,
                        challenge,
                        context,
                        created_at: Utc::now(),
                    };
                    // Expire at once rather than panic if the clock cannot represent it
                    let now = Instant::now();
                    let expires_at = now.checked_add(self.ttl).unwrap_or(now);
                    slot.insert(PendingCeremony {
                        request: request.clone(),
                        expires_at,
                    });
                    tracing::debug!(
                        request_id = %request.request_id,
                        kind = ?request.context.kind(),
                        "Ceremony started"
                    );
                    return request;
                }
            }
        }
    }

    /// Atomically remove and return a pending ceremony.
    ///
    /// Exactly one of any number of concurrent callers for the same id gets
    /// the ceremony. Unknown, already consumed and expired ids all yield
    /// `CeremonyNotFound`.
    pub fn consume(&self, request_id: &str) -> Result<CeremonyRequest> {
        let (_, entry) = self
            .pending
            .remove(request_id)
            .ok_or(CeremonyError::CeremonyNotFound)?;
        if entry.expires_at > Instant::now() {
            Ok(entry.request)
        } else {
            tracing::debug!(request_id, "Ceremony expired before completion");
            Err(CeremonyError::CeremonyNotFound)
        }
    }

    /// Consume a ceremony that must be of `kind`. A ceremony of the other kind
    /// is still consumed, so a request id can never be tried twice.
    pub fn consume_kind(&self, request_id: &str, kind: CeremonyKind) -> Result<CeremonyRequest> {
        let request = self.consume(request_id)?;
        if request.context.kind() != kind {
            tracing::warn!(
                request_id,
                expected = ?kind,
                actual = ?request.context.kind(),
                "Ceremony kind mismatch"
            );
            return Err(CeremonyError::CeremonyNotFound);
        }
        Ok(request)
    }

    /// Remove expired ceremonies (called periodically). Returns how many were
    /// evicted.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.pending.len();
        self.pending.retain(|_, entry| entry.expires_at > now);
        let evicted = before.saturating_sub(self.pending.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired ceremonies");
        }
        evicted
    }

    pub fn stats(&self) -> CeremonyStats {
        self.pending
            .iter()
            .fold(CeremonyStats::default(), |mut stats, entry| {
                match entry.request.context.kind() {
                    CeremonyKind::Registration => stats.pending_registrations += 1,
                    CeremonyKind::Authentication => stats.pending_authentications += 1,
                }
                stats
            })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Debug for CeremonyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CeremonyStore")
            .field("ttl", &self.ttl)
            .field("pending_registrations", &stats.pending_registrations)
            .field("pending_authentications", &stats.pending_authentications)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authentication() -> CeremonyContext {
        CeremonyContext::Authentication(AuthenticationContext {
            username: Some("alice".into()),
            allow_credentials: vec![],
        })
    }

    fn registration() -> CeremonyContext {
        CeremonyContext::Registration(RegistrationContext {
            user: UserIdentity::generate("alice", "Alice"),
            nickname: None,
            exclude_credentials: vec![],
        })
    }

    #[test]
    fn test_consecutive_starts_are_distinct() {
        let store = CeremonyStore::default();
        let a = store.start(registration());
        let b = store.start(registration());
        assert_ne!(a.request_id, b.request_id);
        assert_ne!(a.challenge, b.challenge);
        assert_eq!(a.challenge.len(), 32);
    }

    #[test]
    fn test_consume_exactly_once() {
        let store = CeremonyStore::default();
        let request = store.start(authentication());
        let consumed = store.consume(&request.request_id).unwrap();
        assert_eq!(consumed.challenge, request.challenge);
        assert!(matches!(
            store.consume(&request.request_id),
            Err(CeremonyError::CeremonyNotFound)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_ceremony_unconsumable_without_eviction() {
        let store = CeremonyStore::new(Duration::ZERO, 32);
        let request = store.start(authentication());
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.consume(&request.request_id),
            Err(CeremonyError::CeremonyNotFound)
        ));
    }

    #[test]
    fn test_eviction_keeps_live_entries() {
        let expired = CeremonyStore::new(Duration::ZERO, 32);
        expired.start(authentication());
        expired.start(registration());
        assert_eq!(expired.evict_expired(), 2);
        assert!(expired.is_empty());

        let live = CeremonyStore::default();
        let request = live.start(authentication());
        assert_eq!(live.evict_expired(), 0);
        assert!(live.consume(&request.request_id).is_ok());
    }

    #[test]
    fn test_kind_mismatch_consumes_entry() {
        let store = CeremonyStore::default();
        let request = store.start(registration());
        assert!(matches!(
            store.consume_kind(&request.request_id, CeremonyKind::Authentication),
            Err(CeremonyError::CeremonyNotFound)
        ));
        assert!(store
            .consume_kind(&request.request_id, CeremonyKind::Registration)
            .is_err());
    }

    #[test]
    fn test_stats_by_kind() {
        let store = CeremonyStore::default();
        store.start(registration());
        store.start(authentication());
        store.start(authentication());
        assert_eq!(
            store.stats(),
            CeremonyStats {
                pending_registrations: 1,
                pending_authentications: 2,
            }
        );
    }

    #[test]
    fn test_oversized_ttl_clamped() {
        let store = CeremonyStore::new(Duration::from_secs(u64::MAX), 32);
        assert_eq!(store.ttl(), MAX_CEREMONY_TTL);
        let request = store.start(authentication());
        assert_eq!(store.evict_expired(), 0);
        assert!(store.consume(&request.request_id).is_ok());
    }

    #[test]
    fn test_short_challenge_length_clamped() {
        let store = CeremonyStore::new(DEFAULT_CEREMONY_TTL, 4);
        assert_eq!(store.start(authentication()).challenge.len(), MIN_CHALLENGE_LEN);
    }
}
