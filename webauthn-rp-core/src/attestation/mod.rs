//! Attestation verification for registration ceremonies.
//!
//! Checks run in a fixed order so the first failure is deterministic:
//! challenge, type, origin, RP ID hash, user presence and verification,
//! algorithm, then the format-specific statement. Certificate chains are
//! handed to the [`AttestationTrustService`].

mod fido_u2f;
mod none;
mod packed;

use ciborium::value::Value;
use uuid::Uuid;

use crate::client_data::{ClientData, ClientDataType};
use crate::codec::{cbor, AttestationFormat, AttestationObject, AttestedCredentialData};
use crate::config::{AttestationPolicy, RelyingPartyConfig, UserVerificationPolicy};
use crate::error::{CeremonyError, Result};
use crate::trust::{AttestationTrust, AttestationTrustService, AuthenticatorMetadata, DeviceModel};

/// What a format verifier established.
#[derive(Debug)]
pub(crate) enum StatementOutcome {
    None,
    SelfAttested,
    /// DER certificates, leaf first
    Chain(Vec<Vec<u8>>),
}

/// A registration response that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedRegistration {
    pub client_data: ClientData,
    pub attestation: AttestationObject,
    pub credential: AttestedCredentialData,
    pub trust: AttestationTrust,
    pub device_model: Option<DeviceModel>,
}

impl VerifiedRegistration {
    pub fn aaguid(&self) -> Uuid {
        Uuid::from_bytes(self.credential.aaguid)
    }
}

pub struct AttestationVerifier<'a> {
    config: &'a RelyingPartyConfig,
    trust: Option<&'a dyn AttestationTrustService>,
}

impl<'a> AttestationVerifier<'a> {
    pub fn new(
        config: &'a RelyingPartyConfig,
        trust: Option<&'a dyn AttestationTrustService>,
    ) -> Self {
        Self { config, trust }
    }

    pub async fn verify(
        &self,
        challenge: &[u8],
        client_data_json: &[u8],
        attestation_object: &[u8],
    ) -> Result<VerifiedRegistration> {
        let client_data = ClientData::parse(client_data_json)?;
        client_data.verify(ClientDataType::Create, challenge, self.config)?;

        let attestation =
            AttestationObject::decode(attestation_object, self.config.strict_decoding())?;
        let auth_data = &attestation.auth_data;
        auth_data.verify_rp_id_hash(self.config.rp_id_hash())?;

        if !auth_data.flags.user_present() {
            return Err(CeremonyError::UserNotPresent);
        }
        if self.config.user_verification() == UserVerificationPolicy::Required
            && !auth_data.flags.user_verified()
        {
            return Err(CeremonyError::UserVerificationRequired);
        }

        let credential = auth_data.attested_credential.clone().ok_or_else(|| {
            CeremonyError::malformed(
                "registration authenticator data lacks attested credential data",
            )
        })?;
        let algorithm = credential.public_key.algorithm;
        if !self.config.algorithms().contains(&algorithm) {
            return Err(CeremonyError::UnsupportedAlgorithm(algorithm.id()));
        }

        let outcome = verify_statement(&attestation, &client_data.hash)?;
        let metadata = AuthenticatorMetadata {
            aaguid: Uuid::from_bytes(credential.aaguid),
            format: attestation.format,
        };

        let trust = match outcome {
            StatementOutcome::None => AttestationTrust::None,
            StatementOutcome::SelfAttested => AttestationTrust::SelfAttested,
            StatementOutcome::Chain(chain) => match self.trust {
                Some(service) => service.evaluate(&chain, &metadata).await?.into(),
                None => AttestationTrust::Unknown,
            },
        };

        if self.config.attestation_policy() == AttestationPolicy::Required
            && trust != AttestationTrust::Trusted
        {
            tracing::warn!(
                format = %metadata.format,
                aaguid = %metadata.aaguid,
                ?trust,
                "Rejecting registration without trusted attestation"
            );
            return Err(CeremonyError::UntrustedAttestation);
        }

        let device_model = match self.trust {
            Some(service) => service.device_model(&metadata.aaguid).await?,
            None => None,
        };

        tracing::debug!(
            format = %metadata.format,
            aaguid = %metadata.aaguid,
            alg = %algorithm,
            ?trust,
            "Attestation verified"
        );

        Ok(VerifiedRegistration {
            client_data,
            attestation,
            credential,
            trust,
            device_model,
        })
    }
}

fn verify_statement(
    attestation: &AttestationObject,
    client_data_hash: &[u8; 32],
) -> Result<StatementOutcome> {
    match attestation.format {
        AttestationFormat::None => none::verify(&attestation.statement),
        AttestationFormat::Packed => packed::verify(
            &attestation.statement,
            &attestation.auth_data_bytes,
            &attestation.auth_data,
            client_data_hash,
        ),
        AttestationFormat::FidoU2f => fido_u2f::verify(
            &attestation.statement,
            &attestation.auth_data,
            client_data_hash,
        ),
        other => Err(CeremonyError::UnsupportedAttestationFormat(
            other.as_str().to_string(),
        )),
    }
}

/// Decode an `x5c` array into DER certificates.
pub(crate) fn certificate_chain(x5c: &Value, what: &str) -> Result<Vec<Vec<u8>>> {
    let chain = cbor::as_array(x5c, what)?
        .iter()
        .map(|cert| cbor::as_bytes(cert, what).map(<[u8]>::to_vec))
        .collect::<Result<Vec<_>>>()?;
    if chain.is_empty() {
        return Err(CeremonyError::malformed(format!("{what}: empty certificate chain")));
    }
    Ok(chain)
}
