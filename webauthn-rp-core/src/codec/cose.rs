//! COSE public keys (RFC 9052/9053) restricted to the algorithms a WebAuthn
//! relying party commonly accepts: ES256, EdDSA (Ed25519) and RS256.

use ciborium::value::Value;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, PKeyRef, Public};
use openssl::rsa::Rsa;
use openssl::sign::Verifier;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{base64url, cbor};
use crate::error::{CeremonyError, Result};

// COSE key labels
const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
const LABEL_CRV: i64 = -1;
const LABEL_X: i64 = -2; // also RSA `e`
const LABEL_Y: i64 = -3;
const LABEL_N: i64 = -1;
const LABEL_E: i64 = -2;

// COSE key types
const KTY_OKP: i64 = 1;
const KTY_EC2: i64 = 2;
const KTY_RSA: i64 = 3;

// COSE curves
const CRV_P256: i64 = 1;
const CRV_ED25519: i64 = 6;

/// Room for the labelled parameters plus optional `kid` and `key_ops`
const MAX_KEY_ENTRIES: usize = 16;

const P256_COORDINATE_LEN: usize = 32;
const ED25519_KEY_LEN: usize = 32;

/// Signature algorithms identified by their COSE algorithm number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum CoseAlgorithm {
    /// ECDSA over P-256 with SHA-256
    ES256,
    /// Ed25519
    EdDSA,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256,
}

impl CoseAlgorithm {
    pub const fn id(self) -> i64 {
        match self {
            Self::ES256 => -7,
            Self::EdDSA => -8,
            Self::RS256 => -257,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            -7 => Some(Self::ES256),
            -8 => Some(Self::EdDSA),
            -257 => Some(Self::RS256),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::EdDSA => "EdDSA",
            Self::RS256 => "RS256",
        }
    }
}

impl From<CoseAlgorithm> for i64 {
    fn from(alg: CoseAlgorithm) -> Self {
        alg.id()
    }
}

impl TryFrom<i64> for CoseAlgorithm {
    type Error = CeremonyError;

    fn try_from(id: i64) -> Result<Self> {
        Self::from_id(id).ok_or(CeremonyError::UnsupportedAlgorithm(id))
    }
}

impl std::str::FromStr for CoseAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ES256" | "-7" => Ok(Self::ES256),
            "EDDSA" | "-8" => Ok(Self::EdDSA),
            "RS256" | "-257" => Ok(Self::RS256),
            other => Err(format!("unknown algorithm: {other}")),
        }
    }
}

impl std::fmt::Display for CoseAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key material for the supported key types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoseKeyParams {
    /// P-256 point, uncompressed coordinates
    Ec2 { x: Vec<u8>, y: Vec<u8> },
    /// Ed25519 public key
    Okp { x: Vec<u8> },
    /// RSA modulus and public exponent, big-endian
    Rsa { n: Vec<u8>, e: Vec<u8> },
}

/// A credential public key as carried in attested credential data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub algorithm: CoseAlgorithm,
    pub params: CoseKeyParams,
}

impl CoseKey {
    pub fn ec2_p256(x: Vec<u8>, y: Vec<u8>) -> Result<Self> {
        if x.len() != P256_COORDINATE_LEN || y.len() != P256_COORDINATE_LEN {
            return Err(CeremonyError::malformed(
                "COSE key: P-256 coordinates must be 32 bytes",
            ));
        }
        Ok(Self {
            algorithm: CoseAlgorithm::ES256,
            params: CoseKeyParams::Ec2 { x, y },
        })
    }

    pub fn ed25519(x: Vec<u8>) -> Result<Self> {
        if x.len() != ED25519_KEY_LEN {
            return Err(CeremonyError::malformed(
                "COSE key: Ed25519 key must be 32 bytes",
            ));
        }
        Ok(Self {
            algorithm: CoseAlgorithm::EdDSA,
            params: CoseKeyParams::Okp { x },
        })
    }

    pub fn rsa(n: Vec<u8>, e: Vec<u8>) -> Result<Self> {
        if n.is_empty() || e.is_empty() {
            return Err(CeremonyError::malformed(
                "COSE key: RSA modulus and exponent are required",
            ));
        }
        Ok(Self {
            algorithm: CoseAlgorithm::RS256,
            params: CoseKeyParams::Rsa { n, e },
        })
    }

    /// Decode a COSE key that must occupy the entire buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value = cbor::decode_exact(bytes, "COSE key")?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let map = cbor::as_map(value, "COSE key")?;
        cbor::ensure_unique_keys(map, MAX_KEY_ENTRIES, "COSE key")?;

        let required = |label: i64, name: &str| {
            cbor::int_entry(map, label)
                .ok_or_else(|| CeremonyError::malformed(format!("COSE key: missing {name}")))
        };

        let kty = cbor::as_int(required(LABEL_KTY, "kty")?, "COSE kty")?;
        let alg_id = cbor::as_int(required(LABEL_ALG, "alg")?, "COSE alg")?;
        let algorithm = CoseAlgorithm::try_from(alg_id)?;

        let bytes_param = |label: i64, name: &str| -> Result<Vec<u8>> {
            Ok(cbor::as_bytes(required(label, name)?, name)?.to_vec())
        };

        match (algorithm, kty) {
            (CoseAlgorithm::ES256, KTY_EC2) => {
                let crv = cbor::as_int(required(LABEL_CRV, "crv")?, "COSE crv")?;
                if crv != CRV_P256 {
                    return Err(CeremonyError::malformed(format!(
                        "COSE key: ES256 requires P-256, got curve {crv}"
                    )));
                }
                Self::ec2_p256(bytes_param(LABEL_X, "x")?, bytes_param(LABEL_Y, "y")?)
            }
            (CoseAlgorithm::EdDSA, KTY_OKP) => {
                let crv = cbor::as_int(required(LABEL_CRV, "crv")?, "COSE crv")?;
                if crv != CRV_ED25519 {
                    return Err(CeremonyError::malformed(format!(
                        "COSE key: only Ed25519 is supported for EdDSA, got curve {crv}"
                    )));
                }
                Self::ed25519(bytes_param(LABEL_X, "x")?)
            }
            (CoseAlgorithm::RS256, KTY_RSA) => {
                Self::rsa(bytes_param(LABEL_N, "n")?, bytes_param(LABEL_E, "e")?)
            }
            (alg, kty) => Err(CeremonyError::malformed(format!(
                "COSE key: key type {kty} does not match algorithm {alg}"
            ))),
        }
    }

    /// Canonical CTAP2 encoding: integer keys in ascending encoded order.
    pub fn to_value(&self) -> Value {
        let alg = cbor::int(self.algorithm.id());
        let entries = match &self.params {
            CoseKeyParams::Ec2 { x, y } => vec![
                (cbor::int(LABEL_KTY), cbor::int(KTY_EC2)),
                (cbor::int(LABEL_ALG), alg),
                (cbor::int(LABEL_CRV), cbor::int(CRV_P256)),
                (cbor::int(LABEL_X), Value::Bytes(x.clone())),
                (cbor::int(LABEL_Y), Value::Bytes(y.clone())),
            ],
            CoseKeyParams::Okp { x } => vec![
                (cbor::int(LABEL_KTY), cbor::int(KTY_OKP)),
                (cbor::int(LABEL_ALG), alg),
                (cbor::int(LABEL_CRV), cbor::int(CRV_ED25519)),
                (cbor::int(LABEL_X), Value::Bytes(x.clone())),
            ],
            CoseKeyParams::Rsa { n, e } => vec![
                (cbor::int(LABEL_KTY), cbor::int(KTY_RSA)),
                (cbor::int(LABEL_ALG), alg),
                (cbor::int(LABEL_N), Value::Bytes(n.clone())),
                (cbor::int(LABEL_E), Value::Bytes(e.clone())),
            ],
        };
        Value::Map(entries)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cbor::encode(&self.to_value(), "COSE key")
    }

    /// ANSI X9.62 uncompressed point (`0x04 || x || y`), used by FIDO U2F.
    pub fn x962_uncompressed(&self) -> Option<Vec<u8>> {
        match &self.params {
            CoseKeyParams::Ec2 { x, y } => {
                let mut point = Vec::with_capacity(1 + x.len() + y.len());
                point.push(0x04);
                point.extend_from_slice(x);
                point.extend_from_slice(y);
                Some(point)
            }
            _ => None,
        }
    }

    pub fn to_pkey(&self) -> Result<PKey<Public>> {
        let invalid = |e: openssl::error::ErrorStack| {
            CeremonyError::malformed(format!("COSE key: invalid public key: {e}"))
        };
        match &self.params {
            CoseKeyParams::Ec2 { x, y } => {
                let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).map_err(invalid)?;
                let x = BigNum::from_slice(x).map_err(invalid)?;
                let y = BigNum::from_slice(y).map_err(invalid)?;
                let key =
                    EcKey::from_public_key_affine_coordinates(&group, &x, &y).map_err(invalid)?;
                key.check_key().map_err(invalid)?;
                PKey::from_ec_key(key).map_err(invalid)
            }
            CoseKeyParams::Okp { x } => {
                PKey::public_key_from_raw_bytes(x, Id::ED25519).map_err(invalid)
            }
            CoseKeyParams::Rsa { n, e } => {
                let n = BigNum::from_slice(n).map_err(invalid)?;
                let e = BigNum::from_slice(e).map_err(invalid)?;
                let rsa = Rsa::from_public_components(n, e).map_err(invalid)?;
                PKey::from_rsa(rsa).map_err(invalid)
            }
        }
    }

    /// Verify `signature` over `data` with this key.
    pub fn verify_signature(&self, signature: &[u8], data: &[u8]) -> Result<()> {
        let pkey = self.to_pkey()?;
        verify_with_key(self.algorithm, &pkey, signature, data)
    }
}

/// Verify a WebAuthn signature with an arbitrary public key (credential key
/// or attestation certificate key).
///
/// ES256 signatures are ASN.1 DER encoded, RS256 uses PKCS#1 v1.5 padding and
/// EdDSA signs the message directly.
pub(crate) fn verify_with_key(
    algorithm: CoseAlgorithm,
    key: &PKeyRef<Public>,
    signature: &[u8],
    data: &[u8],
) -> Result<()> {
    let expected_id = match algorithm {
        CoseAlgorithm::ES256 => Id::EC,
        CoseAlgorithm::EdDSA => Id::ED25519,
        CoseAlgorithm::RS256 => Id::RSA,
    };
    if key.id() != expected_id {
        return Err(CeremonyError::invalid_signature(format!(
            "key type does not match algorithm {algorithm}"
        )));
    }

    let failed = |e: openssl::error::ErrorStack| {
        CeremonyError::invalid_signature(format!("{algorithm} verification error: {e}"))
    };

    let valid = match algorithm {
        CoseAlgorithm::ES256 | CoseAlgorithm::RS256 => {
            let mut verifier = Verifier::new(MessageDigest::sha256(), key).map_err(failed)?;
            verifier.update(data).map_err(failed)?;
            verifier.verify(signature).map_err(failed)?
        }
        CoseAlgorithm::EdDSA => {
            let mut verifier = Verifier::new_without_digest(key).map_err(failed)?;
            verifier.verify_oneshot(signature, data).map_err(failed)?
        }
    };

    if valid {
        Ok(())
    } else {
        Err(CeremonyError::invalid_signature(format!(
            "{algorithm} signature does not verify"
        )))
    }
}

impl Serialize for CoseKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let bytes = self.to_bytes().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&base64url::encode(&bytes))
    }
}

impl<'de> Deserialize<'de> for CoseKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = base64url::decode(&encoded).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}
