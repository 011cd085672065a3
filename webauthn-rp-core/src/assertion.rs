//! Assertion verification for authentication ceremonies.

use crate::client_data::{ClientData, ClientDataType};
use crate::codec::AuthenticatorData;
use crate::config::{CounterPolicy, RelyingPartyConfig, UserVerificationPolicy};
use crate::error::{CeremonyError, Result};
use crate::repository::CredentialRegistration;

/// What to do with the stored signature counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOutcome {
    /// Store the new, strictly greater value
    Advance(u32),
    /// Authenticator reports 0: it has no counter, nothing to store
    Unsupported,
    /// Counter did not advance but the lenient policy lets it through
    RegressionTolerated,
}

/// Judge a received signature counter against the stored one.
///
/// A received counter of 0 means the authenticator does not implement one.
/// Any other value must be strictly greater than the stored counter.
pub fn evaluate_counter(
    policy: CounterPolicy,
    stored: u32,
    received: u32,
) -> Result<CounterOutcome> {
    if received == 0 {
        return Ok(CounterOutcome::Unsupported);
    }
    if received > stored {
        return Ok(CounterOutcome::Advance(received));
    }
    match policy {
        CounterPolicy::Strict => Err(CeremonyError::CounterRegression { stored, received }),
        CounterPolicy::Lenient => Ok(CounterOutcome::RegressionTolerated),
    }
}

/// An assertion that passed every check against the stored credential.
#[derive(Debug, Clone)]
pub struct VerifiedAssertion {
    pub client_data: ClientData,
    pub auth_data: AuthenticatorData,
    pub counter: CounterOutcome,
}

pub struct AssertionVerifier<'a> {
    config: &'a RelyingPartyConfig,
}

impl<'a> AssertionVerifier<'a> {
    pub fn new(config: &'a RelyingPartyConfig) -> Self {
        Self { config }
    }

    /// Check, in order: challenge, type, origin, RP ID hash, user presence,
    /// user verification, counter, signature.
    pub fn verify(
        &self,
        challenge: &[u8],
        client_data_json: &[u8],
        authenticator_data: &[u8],
        signature: &[u8],
        stored: &CredentialRegistration,
    ) -> Result<VerifiedAssertion> {
        let client_data = ClientData::parse(client_data_json)?;
        client_data.verify(ClientDataType::Get, challenge, self.config)?;

        let auth_data =
            AuthenticatorData::parse(authenticator_data, self.config.strict_decoding())?;
        auth_data.verify_rp_id_hash(self.config.rp_id_hash())?;

        if !auth_data.flags.user_present() {
            return Err(CeremonyError::UserNotPresent);
        }
        if self.config.user_verification() == UserVerificationPolicy::Required
            && !auth_data.flags.user_verified()
        {
            return Err(CeremonyError::UserVerificationRequired);
        }

        let counter = evaluate_counter(
            self.config.counter_policy(),
            stored.sign_count,
            auth_data.sign_count,
        )?;

        let mut signed = Vec::with_capacity(authenticator_data.len() + client_data.hash.len());
        signed.extend_from_slice(authenticator_data);
        signed.extend_from_slice(&client_data.hash);
        stored.public_key.verify_signature(signature, &signed)?;

        Ok(VerifiedAssertion {
            client_data,
            auth_data,
            counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_must_strictly_increase() {
        use CounterOutcome::*;
        assert_eq!(evaluate_counter(CounterPolicy::Strict, 0, 1).unwrap(), Advance(1));
        assert_eq!(evaluate_counter(CounterPolicy::Strict, 7, 100).unwrap(), Advance(100));
        assert!(matches!(
            evaluate_counter(CounterPolicy::Strict, 5, 5),
            Err(CeremonyError::CounterRegression { stored: 5, received: 5 })
        ));
        assert!(matches!(
            evaluate_counter(CounterPolicy::Strict, 5, 3),
            Err(CeremonyError::CounterRegression { .. })
        ));
    }

    #[test]
    fn test_zero_counter_means_unsupported() {
        assert_eq!(
            evaluate_counter(CounterPolicy::Strict, 0, 0).unwrap(),
            CounterOutcome::Unsupported
        );
        assert_eq!(
            evaluate_counter(CounterPolicy::Strict, 9, 0).unwrap(),
            CounterOutcome::Unsupported
        );
    }

    #[test]
    fn test_lenient_policy_tolerates_regression() {
        assert_eq!(
            evaluate_counter(CounterPolicy::Lenient, 5, 5).unwrap(),
            CounterOutcome::RegressionTolerated
        );
        assert_eq!(
            evaluate_counter(CounterPolicy::Lenient, 5, 6).unwrap(),
            CounterOutcome::Advance(6)
        );
    }

    mod signed {
        use super::super::*;
        use crate::codec::{AttestationObject, CoseAlgorithm};
        use crate::mock::{client_data_json, MockAttestation, SoftAuthenticator};
        use crate::repository::CredentialRegistration;
        use crate::trust::AttestationTrust;
        use crate::types::{CredentialId, UserHandle};

        const ORIGIN: &str = "https://example.com";
        const CHALLENGE: [u8; 32] = [0x17; 32];

        fn config() -> RelyingPartyConfig {
            RelyingPartyConfig::new("example.com", "Example", [ORIGIN]).unwrap()
        }

        fn enrol(
            authenticator: &mut SoftAuthenticator,
            algorithm: CoseAlgorithm,
        ) -> (CredentialId, CredentialRegistration) {
            let handle = UserHandle::generate();
            let client_data = client_data_json("webauthn.create", &[0; 32], ORIGIN);
            let (id, object) = authenticator
                .attest("example.com", &handle, &client_data, algorithm, MockAttestation::None)
                .unwrap();
            let decoded = AttestationObject::decode(&object, true).unwrap();
            let credential = decoded.auth_data.attested_credential.unwrap();
            let registration = CredentialRegistration {
                username: "alice".into(),
                user_handle: handle,
                nickname: None,
                registered_at: chrono::Utc::now(),
                credential_id: id.clone(),
                public_key: credential.public_key,
                sign_count: 0,
                aaguid: uuid::Uuid::nil(),
                attestation_format: decoded.format,
                attestation_trust: AttestationTrust::None,
                transports: vec![],
                backup_eligible: false,
                backed_up: false,
            };
            (id, registration)
        }

        #[test]
        fn test_valid_assertion_each_algorithm() {
            let config = config();
            for algorithm in [CoseAlgorithm::ES256, CoseAlgorithm::EdDSA, CoseAlgorithm::RS256] {
                let mut authenticator = SoftAuthenticator::new();
                let (id, stored) = enrol(&mut authenticator, algorithm);
                let client_data = client_data_json("webauthn.get", &CHALLENGE, ORIGIN);
                let (auth_data, signature) = authenticator.assert(&id, &client_data).unwrap();

                let verified = AssertionVerifier::new(&config)
                    .verify(&CHALLENGE, &client_data, &auth_data, &signature, &stored)
                    .unwrap();
                assert_eq!(verified.counter, CounterOutcome::Advance(1), "{algorithm}");
                assert!(verified.auth_data.flags.user_verified());
            }
        }

        #[test]
        fn test_signature_from_other_key_rejected() {
            let config = config();
            let mut authenticator = SoftAuthenticator::new();
            let (id, _) = enrol(&mut authenticator, CoseAlgorithm::ES256);
            let (_, impostor) = enrol(&mut authenticator, CoseAlgorithm::ES256);

            let client_data = client_data_json("webauthn.get", &CHALLENGE, ORIGIN);
            let (auth_data, signature) = authenticator.assert(&id, &client_data).unwrap();
            let err = AssertionVerifier::new(&config)
                .verify(&CHALLENGE, &client_data, &auth_data, &signature, &impostor)
                .unwrap_err();
            assert!(matches!(err, CeremonyError::InvalidSignature(_)));
        }

        #[test]
        fn test_presence_and_verification_flags() {
            let mut absent = SoftAuthenticator::new().with_user_presence(false);
            let (id, stored) = enrol(&mut absent, CoseAlgorithm::EdDSA);
            let client_data = client_data_json("webauthn.get", &CHALLENGE, ORIGIN);
            let (auth_data, signature) = absent.assert(&id, &client_data).unwrap();
            assert!(matches!(
                AssertionVerifier::new(&config())
                    .verify(&CHALLENGE, &client_data, &auth_data, &signature, &stored),
                Err(CeremonyError::UserNotPresent)
            ));

            let mut unverified = SoftAuthenticator::new().with_user_verification(false);
            let (id, stored) = enrol(&mut unverified, CoseAlgorithm::EdDSA);
            let (auth_data, signature) = unverified.assert(&id, &client_data).unwrap();
            let strict_uv = config().with_user_verification(UserVerificationPolicy::Required);
            assert!(matches!(
                AssertionVerifier::new(&strict_uv)
                    .verify(&CHALLENGE, &client_data, &auth_data, &signature, &stored),
                Err(CeremonyError::UserVerificationRequired)
            ));

            let (auth_data, signature) = unverified.assert(&id, &client_data).unwrap();
            assert!(AssertionVerifier::new(&config())
                .verify(&CHALLENGE, &client_data, &auth_data, &signature, &stored)
                .is_ok());
        }

        #[test]
        fn test_stored_counter_regression() {
            let config = config();
            let mut authenticator = SoftAuthenticator::new();
            let (id, mut stored) = enrol(&mut authenticator, CoseAlgorithm::ES256);
            stored.sign_count = 10;
            authenticator.set_counter(&id, 4).unwrap();

            let client_data = client_data_json("webauthn.get", &CHALLENGE, ORIGIN);
            let (auth_data, signature) = authenticator.assert(&id, &client_data).unwrap();
            assert!(matches!(
                AssertionVerifier::new(&config)
                    .verify(&CHALLENGE, &client_data, &auth_data, &signature, &stored),
                Err(CeremonyError::CounterRegression { stored: 10, received: 5 })
            ));
        }
    }
}
