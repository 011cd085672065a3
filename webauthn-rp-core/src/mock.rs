//! Software authenticator for testing
//!
//! `SoftAuthenticator` plays the browser + authenticator side of both
//! ceremonies: it mints ES256, EdDSA or RS256 credentials, wraps them in
//! `none`, self `packed`, full `packed` or `fido-u2f` attestation objects and
//! signs assertions with a controllable counter.
//!
//! **WARNING**: keys live in process memory. For testing only.

use chrono::Utc;
use ciborium::value::Value;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, BigNumContext, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::codec::{
    base64url, sha256, AttestationFormat, AttestationObject, AttestedCredentialData,
    AuthenticatorData, AuthenticatorFlags, CoseAlgorithm, CoseKey,
};
use crate::error::{CeremonyError, Result};
use crate::types::{CredentialId, UserHandle};
use crate::wire::{
    AssertionChallenge, AssertionResponse, AuthenticatorAssertionResponse,
    AuthenticatorAttestationResponse, PublicKeyCredential, RegistrationChallenge,
    RegistrationResponse,
};

fn openssl_failure(e: ErrorStack) -> CeremonyError {
    CeremonyError::Unexpected(format!("mock authenticator: {e}"))
}

/// Serialise `clientDataJSON` the way a browser would.
pub fn client_data_json(kind: &str, challenge: &[u8], origin: &str) -> Vec<u8> {
    serde_json::json!({
        "type": kind,
        "challenge": base64url::encode(challenge),
        "origin": origin,
        "crossOrigin": false,
    })
    .to_string()
    .into_bytes()
}

/// Attestation statement the authenticator should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockAttestation {
    None,
    /// `packed` signed by the credential key
    PackedSelf,
    /// `packed` with an `x5c` chain from the authenticator's attestation CA
    PackedFull,
    /// `fido-u2f`, ES256 credentials only
    FidoU2f,
}

/// A throwaway two-level attestation PKI: a self-signed root and an
/// attestation leaf, both P-256.
#[derive(Clone)]
pub struct AttestationCa {
    root_der: Vec<u8>,
    leaf_der: Vec<u8>,
    leaf_key: PKey<Private>,
}

impl AttestationCa {
    pub fn generate() -> Result<Self> {
        Self::build().map_err(openssl_failure)
    }

    fn build() -> std::result::Result<Self, ErrorStack> {
        let root_key = PKey::from_ec_key(p256_key()?)?;
        let root = certificate("Mock Attestation Root", &root_key, None, true)?;
        let leaf_key = PKey::from_ec_key(p256_key()?)?;
        let leaf = certificate(
            "Mock Authenticator Attestation",
            &leaf_key,
            Some((&root, &root_key)),
            false,
        )?;
        Ok(Self {
            root_der: root.to_der()?,
            leaf_der: leaf.to_der()?,
            leaf_key,
        })
    }

    pub fn root_der(&self) -> Vec<u8> {
        self.root_der.clone()
    }

    pub fn leaf_der(&self) -> Vec<u8> {
        self.leaf_der.clone()
    }
}

fn p256_key() -> std::result::Result<EcKey<Private>, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    EcKey::generate(&group)
}

fn certificate(
    common_name: &str,
    subject_key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    ca: bool,
) -> std::result::Result<X509, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("C", "US")?;
    name.append_entry_by_text("O", "Mock Authenticators")?;
    name.append_entry_by_text("OU", "Authenticator Attestation")?;
    name.append_entry_by_text("CN", common_name)?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;
    let not_before = Asn1Time::from_unix(Utc::now().timestamp() - 3600)?;
    let not_after = Asn1Time::days_from_now(365)?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    match issuer {
        Some((issuer_cert, _)) => builder.set_issuer_name(issuer_cert.subject_name())?,
        None => builder.set_issuer_name(&name)?,
    }
    builder.set_pubkey(subject_key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    if ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build()?)?;
    } else {
        builder.append_extension(BasicConstraints::new().build()?)?;
    }

    let signing_key = issuer.map(|(_, key)| key).unwrap_or(subject_key);
    builder.sign(signing_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

struct SoftCredential {
    id: CredentialId,
    rp_id: String,
    user_handle: UserHandle,
    algorithm: CoseAlgorithm,
    key: PKey<Private>,
    counter: u32,
}

impl SoftCredential {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        sign_with(self.algorithm, &self.key, data).map_err(openssl_failure)
    }
}

fn sign_with(
    algorithm: CoseAlgorithm,
    key: &PKey<Private>,
    data: &[u8],
) -> std::result::Result<Vec<u8>, ErrorStack> {
    match algorithm {
        CoseAlgorithm::ES256 | CoseAlgorithm::RS256 => {
            let mut signer = Signer::new(MessageDigest::sha256(), key)?;
            signer.update(data)?;
            signer.sign_to_vec()
        }
        CoseAlgorithm::EdDSA => {
            let mut signer = Signer::new_without_digest(key)?;
            signer.sign_oneshot_to_vec(data)
        }
    }
}

enum KeyMaterial {
    Ec2(Vec<u8>, Vec<u8>),
    Okp(Vec<u8>),
    Rsa(Vec<u8>, Vec<u8>),
}

fn new_key_pair(
    algorithm: CoseAlgorithm,
) -> std::result::Result<(PKey<Private>, KeyMaterial), ErrorStack> {
    match algorithm {
        CoseAlgorithm::ES256 => {
            let ec = p256_key()?;
            let mut ctx = BigNumContext::new()?;
            let mut x = BigNum::new()?;
            let mut y = BigNum::new()?;
            ec.public_key()
                .affine_coordinates_gfp(ec.group(), &mut x, &mut y, &mut ctx)?;
            let material = KeyMaterial::Ec2(x.to_vec_padded(32)?, y.to_vec_padded(32)?);
            Ok((PKey::from_ec_key(ec)?, material))
        }
        CoseAlgorithm::EdDSA => {
            let key = PKey::generate_ed25519()?;
            let material = KeyMaterial::Okp(key.raw_public_key()?);
            Ok((key, material))
        }
        CoseAlgorithm::RS256 => {
            let rsa = Rsa::generate(2048)?;
            let material = KeyMaterial::Rsa(rsa.n().to_vec(), rsa.e().to_vec());
            Ok((PKey::from_rsa(rsa)?, material))
        }
    }
}

fn generate_key(algorithm: CoseAlgorithm) -> Result<(PKey<Private>, CoseKey)> {
    let (key, material) = new_key_pair(algorithm).map_err(openssl_failure)?;
    let cose = match material {
        KeyMaterial::Ec2(x, y) => CoseKey::ec2_p256(x, y)?,
        KeyMaterial::Okp(x) => CoseKey::ed25519(x)?,
        KeyMaterial::Rsa(n, e) => CoseKey::rsa(n, e)?,
    };
    Ok((key, cose))
}

/// In-memory authenticator holding its own credentials.
pub struct SoftAuthenticator {
    aaguid: [u8; 16],
    credentials: Vec<SoftCredential>,
    attestation_ca: Option<AttestationCa>,
    user_present: bool,
    user_verified: bool,
    backup_eligible: bool,
    counter_enabled: bool,
}

impl Default for SoftAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftAuthenticator {
    pub fn new() -> Self {
        Self {
            aaguid: [0u8; 16],
            credentials: Vec::new(),
            attestation_ca: None,
            user_present: true,
            user_verified: true,
            backup_eligible: false,
            counter_enabled: true,
        }
    }

    pub fn with_aaguid(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid = aaguid;
        self
    }

    pub fn with_attestation_ca(mut self, ca: AttestationCa) -> Self {
        self.attestation_ca = Some(ca);
        self
    }

    pub fn with_user_presence(mut self, present: bool) -> Self {
        self.user_present = present;
        self
    }

    pub fn with_user_verification(mut self, verified: bool) -> Self {
        self.user_verified = verified;
        self
    }

    pub fn with_backup_eligible(mut self, eligible: bool) -> Self {
        self.backup_eligible = eligible;
        self
    }

    /// Authenticators without a signature counter always report 0.
    pub fn with_counter(mut self, enabled: bool) -> Self {
        self.counter_enabled = enabled;
        self
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    /// Set the last reported counter of a credential; the next assertion
    /// reports `value + 1`.
    pub fn set_counter(&mut self, credential_id: &CredentialId, value: u32) -> Result<()> {
        let credential = self.credential_mut(credential_id)?;
        credential.counter = value;
        Ok(())
    }

    fn credential_mut(&mut self, credential_id: &CredentialId) -> Result<&mut SoftCredential> {
        self.credentials
            .iter_mut()
            .find(|c| &c.id == credential_id)
            .ok_or_else(|| CeremonyError::UnknownCredential(credential_id.to_string()))
    }

    fn flags(&self, extra: u8) -> AuthenticatorFlags {
        let mut flags = extra;
        if self.user_present {
            flags |= AuthenticatorFlags::USER_PRESENT;
        }
        if self.user_verified {
            flags |= AuthenticatorFlags::USER_VERIFIED;
        }
        if self.backup_eligible {
            flags |= AuthenticatorFlags::BACKUP_ELIGIBLE;
        }
        AuthenticatorFlags(flags)
    }

    /// Create a credential and return its id and CBOR attestation object.
    pub fn attest(
        &mut self,
        rp_id: &str,
        user_handle: &UserHandle,
        client_data_json: &[u8],
        algorithm: CoseAlgorithm,
        attestation: MockAttestation,
    ) -> Result<(CredentialId, Vec<u8>)> {
        let (key, public_key) = generate_key(algorithm)?;
        let mut id = vec![0u8; 32];
        OsRng.fill_bytes(&mut id);
        let credential_id = CredentialId::new(id.clone());

        let auth_data = AuthenticatorData {
            rp_id_hash: sha256(rp_id.as_bytes()),
            flags: self.flags(AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA),
            sign_count: 0,
            attested_credential: Some(AttestedCredentialData {
                aaguid: self.aaguid,
                credential_id: id,
                public_key_bytes: public_key.to_bytes()?,
                public_key,
            }),
            extensions: None,
        };
        let auth_data_bytes = auth_data.to_bytes()?;
        let client_data_hash = sha256(client_data_json);

        let mut signed = auth_data_bytes.clone();
        signed.extend_from_slice(&client_data_hash);

        let text = |s: &str| Value::Text(s.to_string());
        let alg = |a: CoseAlgorithm| Value::Integer(a.id().into());

        let (format, statement) = match attestation {
            MockAttestation::None => (AttestationFormat::None, vec![]),
            MockAttestation::PackedSelf => {
                let sig = sign_with(algorithm, &key, &signed).map_err(openssl_failure)?;
                (
                    AttestationFormat::Packed,
                    vec![(text("alg"), alg(algorithm)), (text("sig"), Value::Bytes(sig))],
                )
            }
            MockAttestation::PackedFull => {
                let ca = self.require_ca()?;
                let sig = sign_with(CoseAlgorithm::ES256, &ca.leaf_key, &signed)
                    .map_err(openssl_failure)?;
                (
                    AttestationFormat::Packed,
                    vec![
                        (text("alg"), alg(CoseAlgorithm::ES256)),
                        (text("sig"), Value::Bytes(sig)),
                        (text("x5c"), Value::Array(vec![Value::Bytes(ca.leaf_der())])),
                    ],
                )
            }
            MockAttestation::FidoU2f => {
                let ca = self.require_ca()?;
                let point = auth_data
                    .attested_credential
                    .as_ref()
                    .and_then(|c| c.public_key.x962_uncompressed())
                    .ok_or_else(|| {
                        CeremonyError::Unexpected("fido-u2f requires an ES256 credential".into())
                    })?;
                let mut u2f = vec![0x00];
                u2f.extend_from_slice(&auth_data.rp_id_hash);
                u2f.extend_from_slice(&client_data_hash);
                u2f.extend_from_slice(credential_id.as_bytes());
                u2f.extend_from_slice(&point);
                let sig = sign_with(CoseAlgorithm::ES256, &ca.leaf_key, &u2f)
                    .map_err(openssl_failure)?;
                (
                    AttestationFormat::FidoU2f,
                    vec![
                        (text("sig"), Value::Bytes(sig)),
                        (text("x5c"), Value::Array(vec![Value::Bytes(ca.leaf_der())])),
                    ],
                )
            }
        };

        let object = AttestationObject {
            format,
            statement,
            auth_data_bytes,
            auth_data,
        }
        .encode()?;

        self.credentials.push(SoftCredential {
            id: credential_id.clone(),
            rp_id: rp_id.to_string(),
            user_handle: user_handle.clone(),
            algorithm,
            key,
            counter: 0,
        });
        Ok((credential_id, object))
    }

    fn require_ca(&self) -> Result<&AttestationCa> {
        self.attestation_ca
            .as_ref()
            .ok_or_else(|| CeremonyError::Unexpected("no attestation CA configured".into()))
    }

    /// Sign an assertion, returning authenticator data and signature.
    pub fn assert(
        &mut self,
        credential_id: &CredentialId,
        client_data_json: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let flags = self.flags(0);
        let counter_enabled = self.counter_enabled;
        let credential = self.credential_mut(credential_id)?;
        let sign_count = if counter_enabled {
            credential.counter = credential.counter.wrapping_add(1);
            credential.counter
        } else {
            0
        };

        let auth_data = AuthenticatorData {
            rp_id_hash: sha256(credential.rp_id.as_bytes()),
            flags,
            sign_count,
            attested_credential: None,
            extensions: None,
        }
        .to_bytes()?;

        let mut signed = auth_data.clone();
        signed.extend_from_slice(&sha256(client_data_json));
        let signature = credential.sign(&signed)?;
        Ok((auth_data, signature))
    }

    /// Answer `navigator.credentials.create()` for the given options.
    pub fn make_credential(
        &mut self,
        challenge: &RegistrationChallenge,
        origin: &str,
        algorithm: CoseAlgorithm,
        attestation: MockAttestation,
    ) -> Result<RegistrationResponse> {
        let options = &challenge.public_key;
        let client_data = client_data_json("webauthn.create", &options.challenge, origin);
        let (credential_id, attestation_object) = self.attest(
            &options.rp.id,
            &options.user.handle,
            &client_data,
            algorithm,
            attestation,
        )?;
        Ok(RegistrationResponse {
            request_id: challenge.request_id.clone(),
            credential: PublicKeyCredential::new(
                credential_id.as_bytes().to_vec(),
                AuthenticatorAttestationResponse {
                    attestation_object,
                    client_data_json: client_data,
                    transports: vec![],
                },
            ),
        })
    }

    /// Answer `navigator.credentials.get()`: uses the first allowed
    /// credential this authenticator holds, or for an empty allow list the
    /// newest credential for the RP.
    pub fn get_assertion(
        &mut self,
        challenge: &AssertionChallenge,
        origin: &str,
    ) -> Result<AssertionResponse> {
        let options = &challenge.public_key;
        let chosen = if options.allow_credentials.is_empty() {
            self.credentials
                .iter()
                .rev()
                .find(|c| c.rp_id == options.rp_id)
                .map(|c| c.id.clone())
        } else {
            options
                .allow_credentials
                .iter()
                .find(|d| self.credentials.iter().any(|c| c.id == d.id))
                .map(|d| d.id.clone())
        };
        let credential_id = chosen.ok_or_else(|| {
            CeremonyError::Unexpected("authenticator holds no matching credential".into())
        })?;
        self.get_assertion_with(challenge, origin, &credential_id)
    }

    /// Answer `navigator.credentials.get()` with a specific credential.
    pub fn get_assertion_with(
        &mut self,
        challenge: &AssertionChallenge,
        origin: &str,
        credential_id: &CredentialId,
    ) -> Result<AssertionResponse> {
        let client_data =
            client_data_json("webauthn.get", &challenge.public_key.challenge, origin);
        let (authenticator_data, signature) = self.assert(credential_id, &client_data)?;
        let user_handle = self.credential_mut(credential_id)?.user_handle.clone();
        Ok(AssertionResponse {
            request_id: challenge.request_id.clone(),
            credential: PublicKeyCredential::new(
                credential_id.as_bytes().to_vec(),
                AuthenticatorAssertionResponse {
                    authenticator_data,
                    client_data_json: client_data,
                    signature,
                    user_handle: Some(user_handle.as_bytes().to_vec()),
                },
            ),
        })
    }
}

impl std::fmt::Debug for SoftAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftAuthenticator")
            .field("aaguid", &hex::encode(self.aaguid))
            .field("credentials", &self.credentials.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attestation_ca_chain_verifies() {
        let ca = AttestationCa::generate().unwrap();
        let root = X509::from_der(&ca.root_der()).unwrap();
        let leaf = X509::from_der(&ca.leaf_der()).unwrap();
        assert!(leaf.verify(&root.public_key().unwrap()).unwrap());
        assert_eq!(leaf.version(), 2);
    }

    #[test]
    fn test_assertion_counter_behaviour() {
        let mut authenticator = SoftAuthenticator::new();
        let client_data = client_data_json("webauthn.create", &[1; 32], "https://example.com");
        let (id, _) = authenticator
            .attest(
                "example.com",
                &UserHandle::generate(),
                &client_data,
                CoseAlgorithm::EdDSA,
                MockAttestation::None,
            )
            .unwrap();

        let (first, _) = authenticator.assert(&id, b"{}").unwrap();
        let (second, _) = authenticator.assert(&id, b"{}").unwrap();
        assert_eq!(AuthenticatorData::parse(&first, true).unwrap().sign_count, 1);
        assert_eq!(AuthenticatorData::parse(&second, true).unwrap().sign_count, 2);

        authenticator.set_counter(&id, 0).unwrap();
        let (replayed, _) = authenticator.assert(&id, b"{}").unwrap();
        assert_eq!(AuthenticatorData::parse(&replayed, true).unwrap().sign_count, 1);
    }

    #[test]
    fn test_u2f_requires_es256_and_ca() {
        let mut authenticator = SoftAuthenticator::new();
        let client_data = client_data_json("webauthn.create", &[1; 32], "https://example.com");
        assert!(authenticator
            .attest(
                "example.com",
                &UserHandle::generate(),
                &client_data,
                CoseAlgorithm::ES256,
                MockAttestation::FidoU2f,
            )
            .is_err());
        assert_eq!(authenticator.credential_count(), 0);
    }
}
