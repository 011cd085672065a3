//! Relying party orchestrator
//!
//! Ties configuration, the ceremony store, the credential repository and the
//! optional trust service together behind the four ceremony operations.
//! Every `finish_*` consumes its ceremony first, so a request id is good for
//! exactly one attempt whatever the outcome.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::assertion::{evaluate_counter, AssertionVerifier, CounterOutcome};
use crate::attestation::AttestationVerifier;
use crate::ceremony::{
    AuthenticationContext, CeremonyContext, CeremonyKind, CeremonyStats, CeremonyStore,
    RegistrationContext,
};
use crate::codec::{AttestationFormat, CoseAlgorithm, CoseKey};
use crate::config::{AttestationPolicy, RelyingPartyConfig};
use crate::error::{CeremonyError, Result};
use crate::repository::{
    CounterUpdate, CredentialRegistration, CredentialRepository, RepositoryError,
};
use crate::trust::{AttestationTrust, AttestationTrustService, DeviceModel};
use crate::types::{
    AuthenticatorTransport, CredentialDescriptor, CredentialId, UserHandle, UserIdentity,
};
use crate::wire::{
    AssertionChallenge, AssertionResponse, AttestationConveyance, AuthenticatorSelection,
    PubKeyCredParam, PublicKeyCredentialCreationOptions, PublicKeyCredentialRequestOptions,
    RegistrationChallenge, RegistrationResponse, ResidentKeyRequirement,
};

/// Who may answer an authentication ceremony.
#[derive(Debug, Clone)]
pub enum AuthenticationScope {
    /// Any credential registered to this username
    User(String),
    /// Any discoverable credential; the user is identified by the returned
    /// user handle
    Discoverable,
    /// An explicit allow list
    Credentials(Vec<CredentialDescriptor>),
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationResult {
    pub username: String,
    pub user_handle: UserHandle,
    pub credential_id: CredentialId,
    pub public_key: CoseKey,
    pub algorithm: CoseAlgorithm,
    pub sign_count: u32,
    pub trust: AttestationTrust,
    pub attestation_format: AttestationFormat,
    pub aaguid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<DeviceModel>,
    pub user_verified: bool,
    pub backup_eligible: bool,
    pub backed_up: bool,
    pub transports: Vec<AuthenticatorTransport>,
    /// Authenticator extension outputs (CBOR map), if any
    #[serde(skip)]
    pub extensions: Option<ciborium::value::Value>,
}

/// Outcome of a successful authentication.
#[derive(Debug, Clone, Serialize)]
pub struct AssertionResult {
    pub username: String,
    pub user_handle: UserHandle,
    pub credential_id: CredentialId,
    pub sign_count: u32,
    /// Counter did not advance and the lenient policy accepted it anyway
    pub counter_regressed: bool,
    pub user_verified: bool,
    pub backed_up: bool,
    #[serde(skip)]
    pub extensions: Option<ciborium::value::Value>,
}

/// WebAuthn relying party.
///
/// Cheap to share behind an `Arc`; all state lives in the injected stores so
/// several instances can coexist in one process.
pub struct RelyingParty {
    config: RelyingPartyConfig,
    ceremonies: CeremonyStore,
    credentials: Arc<dyn CredentialRepository>,
    trust: Option<Arc<dyn AttestationTrustService>>,
}

impl RelyingParty {
    pub fn new(config: RelyingPartyConfig, credentials: Arc<dyn CredentialRepository>) -> Self {
        let ceremonies = CeremonyStore::new(config.ceremony_ttl(), config.challenge_len());
        Self {
            config,
            ceremonies,
            credentials,
            trust: None,
        }
    }

    pub fn with_trust_service(mut self, trust: Arc<dyn AttestationTrustService>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }

    pub fn ceremonies(&self) -> &CeremonyStore {
        &self.ceremonies
    }

    pub fn ceremony_stats(&self) -> CeremonyStats {
        self.ceremonies.stats()
    }

    /// Drop ceremonies past their TTL; returns how many were removed.
    pub fn evict_expired_ceremonies(&self) -> usize {
        self.ceremonies.evict_expired()
    }

    // ==================== Registration ====================

    /// Begin registering a credential for `user`.
    ///
    /// The user's already registered credentials are always added to the
    /// exclude list, next to any the caller supplies.
    pub async fn start_registration(
        &self,
        user: UserIdentity,
        exclude_credentials: Vec<CredentialDescriptor>,
        nickname: Option<String>,
    ) -> Result<RegistrationChallenge> {
        if user.name.trim().is_empty() {
            return Err(CeremonyError::malformed("username is required"));
        }

        if let Some(existing) = self.credentials.user_handle_for(&user.name).await? {
            if existing != user.handle {
                tracing::warn!(username = %user.name, "User handle differs from registered handle");
                return Err(CeremonyError::UserHandleMismatch);
            }
        }

        let mut exclude = exclude_credentials;
        for registration in self.credentials.lookup_by_username(&user.name).await? {
            if !exclude.iter().any(|d| d.id == registration.credential_id) {
                exclude.push(CredentialDescriptor::new(
                    registration.credential_id,
                    registration.transports,
                ));
            }
        }

        let request = self.ceremonies.start(CeremonyContext::Registration(RegistrationContext {
            user: user.clone(),
            nickname,
            exclude_credentials: exclude.iter().map(|d| d.id.clone()).collect(),
        }));

        let conveyance = match self.config.attestation_policy() {
            AttestationPolicy::Required => AttestationConveyance::Direct,
            AttestationPolicy::Optional => AttestationConveyance::None,
        };

        tracing::info!(
            request_id = %request.request_id,
            username = %user.name,
            excluded = exclude.len(),
            "Registration started"
        );

        Ok(RegistrationChallenge {
            request_id: request.request_id,
            public_key: PublicKeyCredentialCreationOptions {
                rp: self.config.rp().clone(),
                user,
                challenge: request.challenge,
                pub_key_cred_params: self
                    .config
                    .algorithms()
                    .iter()
                    .map(|alg| PubKeyCredParam {
                        kind: crate::PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
                        alg: *alg,
                    })
                    .collect(),
                timeout: self.config.timeout_ms(),
                exclude_credentials: exclude,
                authenticator_selection: AuthenticatorSelection {
                    resident_key: ResidentKeyRequirement::Preferred,
                    require_resident_key: false,
                    user_verification: self.config.user_verification(),
                },
                attestation: conveyance,
            },
        })
    }

    /// Begin registration by username, reusing the user's handle when they
    /// already have credentials and minting a fresh one otherwise.
    pub async fn start_registration_for(
        &self,
        username: &str,
        display_name: &str,
        nickname: Option<String>,
    ) -> Result<RegistrationChallenge> {
        let handle = match self.credentials.user_handle_for(username).await? {
            Some(handle) => handle,
            None => UserHandle::generate(),
        };
        let display_name = if display_name.trim().is_empty() {
            username
        } else {
            display_name
        };
        self.start_registration(UserIdentity::new(handle, username, display_name), vec![], nickname)
            .await
    }

    pub async fn finish_registration(
        &self,
        response: &RegistrationResponse,
    ) -> Result<RegistrationResult> {
        let request = self
            .ceremonies
            .consume_kind(&response.request_id, CeremonyKind::Registration)?;
        let CeremonyContext::Registration(context) = request.context else {
            return Err(CeremonyError::CeremonyNotFound);
        };

        let result = self
            .complete_registration(&request.challenge, context, response)
            .await;
        if let Err(e) = &result {
            log_failure("Registration", &response.request_id, e);
        }
        result
    }

    async fn complete_registration(
        &self,
        challenge: &[u8],
        context: RegistrationContext,
        response: &RegistrationResponse,
    ) -> Result<RegistrationResult> {
        let credential = &response.credential;
        let credential_id = credential.credential_id()?;

        let verified = AttestationVerifier::new(&self.config, self.trust.as_deref())
            .verify(
                challenge,
                &credential.response.client_data_json,
                &credential.response.attestation_object,
            )
            .await?;

        if verified.credential.credential_id != credential_id.as_bytes() {
            return Err(CeremonyError::malformed(
                "attested credential id does not match rawId",
            ));
        }
        if context.exclude_credentials.contains(&credential_id) {
            return Err(CeremonyError::CredentialAlreadyRegistered(credential_id.to_string()));
        }

        let flags = verified.attestation.auth_data.flags;
        let aaguid = verified.aaguid();
        let user = context.user;
        let registration = CredentialRegistration {
            username: user.name.clone(),
            user_handle: user.handle.clone(),
            nickname: context.nickname,
            registered_at: Utc::now(),
            credential_id: credential_id.clone(),
            public_key: verified.credential.public_key.clone(),
            sign_count: verified.attestation.auth_data.sign_count,
            aaguid,
            attestation_format: verified.attestation.format,
            attestation_trust: verified.trust,
            transports: credential.response.transports.clone(),
            backup_eligible: flags.backup_eligible(),
            backed_up: flags.backed_up(),
        };
        self.credentials.add(registration).await?;

        tracing::info!(
            request_id = %response.request_id,
            username = %user.name,
            credential_id = %credential_id,
            format = %verified.attestation.format,
            trust = ?verified.trust,
            "Registration completed"
        );

        Ok(RegistrationResult {
            username: user.name,
            user_handle: user.handle,
            credential_id,
            algorithm: verified.credential.public_key.algorithm,
            public_key: verified.credential.public_key,
            sign_count: verified.attestation.auth_data.sign_count,
            trust: verified.trust,
            attestation_format: verified.attestation.format,
            aaguid,
            device_model: verified.device_model,
            user_verified: flags.user_verified(),
            backup_eligible: flags.backup_eligible(),
            backed_up: flags.backed_up(),
            transports: credential.response.transports.clone(),
            extensions: verified.attestation.auth_data.extensions,
        })
    }

    // ==================== Authentication ====================

    pub async fn start_authentication(
        &self,
        scope: AuthenticationScope,
    ) -> Result<AssertionChallenge> {
        let (username, allow) = match scope {
            AuthenticationScope::User(username) => {
                if username.trim().is_empty() {
                    return Err(CeremonyError::malformed("username is required"));
                }
                let registrations = self.credentials.lookup_by_username(&username).await?;
                if registrations.is_empty() {
                    return Err(CeremonyError::NotRegistered(username));
                }
                let allow = registrations
                    .into_iter()
                    .map(|r| CredentialDescriptor::new(r.credential_id, r.transports))
                    .collect::<Vec<_>>();
                (Some(username), allow)
            }
            AuthenticationScope::Discoverable => (None, Vec::new()),
            AuthenticationScope::Credentials(allow) => (None, allow),
        };

        let request = self
            .ceremonies
            .start(CeremonyContext::Authentication(AuthenticationContext {
                username: username.clone(),
                allow_credentials: allow.iter().map(|d| d.id.clone()).collect(),
            }));

        tracing::info!(
            request_id = %request.request_id,
            username = username.as_deref().unwrap_or("<discoverable>"),
            allowed = allow.len(),
            "Authentication started"
        );

        Ok(AssertionChallenge {
            request_id: request.request_id,
            public_key: PublicKeyCredentialRequestOptions {
                challenge: request.challenge,
                timeout: self.config.timeout_ms(),
                rp_id: self.config.rp_id().to_string(),
                allow_credentials: allow,
                user_verification: self.config.user_verification(),
            },
        })
    }

    pub async fn finish_authentication(
        &self,
        response: &AssertionResponse,
    ) -> Result<AssertionResult> {
        let request = self
            .ceremonies
            .consume_kind(&response.request_id, CeremonyKind::Authentication)?;
        let CeremonyContext::Authentication(context) = request.context else {
            return Err(CeremonyError::CeremonyNotFound);
        };

        let result = self
            .complete_authentication(&request.challenge, context, response)
            .await;
        if let Err(e) = &result {
            log_failure("Authentication", &response.request_id, e);
        }
        result
    }

    async fn complete_authentication(
        &self,
        challenge: &[u8],
        context: AuthenticationContext,
        response: &AssertionResponse,
    ) -> Result<AssertionResult> {
        let credential = &response.credential;
        let credential_id = credential.credential_id()?;

        if !context.allow_credentials.is_empty()
            && !context.allow_credentials.contains(&credential_id)
        {
            return Err(CeremonyError::CredentialNotAllowed(credential_id.to_string()));
        }

        let stored = self
            .credentials
            .lookup_by_credential_id(&credential_id)
            .await?
            .ok_or_else(|| CeremonyError::UnknownCredential(credential_id.to_string()))?;

        if let Some(username) = &context.username {
            if &stored.username != username {
                return Err(CeremonyError::CredentialNotAllowed(credential_id.to_string()));
            }
        }

        match &credential.response.user_handle {
            Some(handle) if handle.as_slice() != stored.user_handle.as_bytes() => {
                return Err(CeremonyError::UserHandleMismatch);
            }
            None if context.username.is_none() && context.allow_credentials.is_empty() => {
                return Err(CeremonyError::malformed(
                    "discoverable authentication requires a userHandle",
                ));
            }
            _ => {}
        }

        let verified = AssertionVerifier::new(&self.config).verify(
            challenge,
            &credential.response.client_data_json,
            &credential.response.authenticator_data,
            &credential.response.signature,
            &stored,
        )?;

        let received = verified.auth_data.sign_count;
        let (sign_count, counter_regressed) = self
            .commit_counter(&credential_id, stored.sign_count, received, verified.counter)
            .await?;

        tracing::info!(
            request_id = %response.request_id,
            username = %stored.username,
            credential_id = %credential_id,
            sign_count,
            "Authentication completed"
        );

        Ok(AssertionResult {
            username: stored.username,
            user_handle: stored.user_handle,
            credential_id,
            sign_count,
            counter_regressed,
            user_verified: verified.auth_data.flags.user_verified(),
            backed_up: verified.auth_data.flags.backed_up(),
            extensions: verified.auth_data.extensions,
        })
    }

    /// Store an advanced counter with compare-and-set, re-judging against
    /// whatever a concurrent assertion stored in between.
    async fn commit_counter(
        &self,
        credential_id: &CredentialId,
        mut stored: u32,
        received: u32,
        mut outcome: CounterOutcome,
    ) -> Result<(u32, bool)> {
        loop {
            match outcome {
                CounterOutcome::Unsupported => return Ok((stored, false)),
                CounterOutcome::RegressionTolerated => {
                    tracing::warn!(
                        credential_id = %credential_id,
                        stored,
                        received,
                        "Signature counter did not advance; accepted under lenient policy"
                    );
                    return Ok((stored, true));
                }
                CounterOutcome::Advance(new) => {
                    match self.credentials.update_counter(credential_id, stored, new).await {
                        Ok(CounterUpdate::Updated) => return Ok((new, false)),
                        Ok(CounterUpdate::Conflict { current }) => {
                            stored = current;
                            outcome =
                                evaluate_counter(self.config.counter_policy(), stored, received)?;
                        }
                        Err(RepositoryError::NotFound(_)) => {
                            // Deregistered while the assertion was in flight
                            return Err(CeremonyError::UnknownCredential(credential_id.to_string()));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    // ==================== Credential management ====================

    /// Remove one of `username`'s credentials.
    pub async fn deregister(
        &self,
        username: &str,
        credential_id: &CredentialId,
    ) -> Result<CredentialRegistration> {
        if username.trim().is_empty() {
            return Err(CeremonyError::malformed("username is required"));
        }
        if credential_id.as_bytes().is_empty() {
            return Err(CeremonyError::malformed("credential id is required"));
        }
        match self.credentials.remove(username, credential_id).await {
            Ok(removed) => {
                tracing::info!(
                    username,
                    credential_id = %credential_id,
                    "Credential deregistered"
                );
                Ok(removed)
            }
            Err(RepositoryError::NotFound(id)) => Err(CeremonyError::NotRegistered(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Credentials registered to `username`.
    pub async fn registrations(&self, username: &str) -> Result<Vec<CredentialRegistration>> {
        Ok(self.credentials.lookup_by_username(username).await?)
    }
}

fn log_failure(ceremony: &str, request_id: &str, error: &CeremonyError) {
    if error.is_security_event() {
        tracing::error!(request_id, code = error.code(), %error, "{ceremony} failed");
    } else if error.is_retryable() {
        tracing::error!(
            request_id,
            code = error.code(),
            %error,
            "{ceremony} failed: collaborator unavailable"
        );
    } else {
        tracing::warn!(request_id, code = error.code(), %error, "{ceremony} failed");
    }
}

impl std::fmt::Debug for RelyingParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelyingParty")
            .field("rp_id", &self.config.rp_id())
            .field("ceremonies", &self.ceremonies)
            .field("trust_service", &self.trust.is_some())
            .finish()
    }
}
