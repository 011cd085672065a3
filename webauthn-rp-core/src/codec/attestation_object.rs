//! CBOR attestation object: `{ "fmt": tstr, "attStmt": map, "authData": bstr }`.

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use super::authenticator_data::AuthenticatorData;
use super::cbor;
use crate::error::{CeremonyError, Result};

/// WebAuthn attestation statement format identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttestationFormat {
    /// Standard packed format (full or self attestation)
    #[serde(rename = "packed")]
    Packed,
    /// TPM attestation (Windows)
    #[serde(rename = "tpm")]
    Tpm,
    /// Android Key attestation (hardware-backed)
    #[serde(rename = "android-key")]
    AndroidKey,
    /// Android SafetyNet (legacy)
    #[serde(rename = "android-safetynet")]
    AndroidSafetyNet,
    /// Apple anonymous attestation
    #[serde(rename = "apple")]
    Apple,
    /// FIDO U2F
    #[serde(rename = "fido-u2f")]
    FidoU2f,
    /// No attestation
    #[default]
    #[serde(rename = "none")]
    None,
}

impl AttestationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Packed => "packed",
            Self::Tpm => "tpm",
            Self::AndroidKey => "android-key",
            Self::AndroidSafetyNet => "android-safetynet",
            Self::Apple => "apple",
            Self::FidoU2f => "fido-u2f",
            Self::None => "none",
        }
    }

    pub fn from_fmt(fmt: &str) -> Result<Self> {
        match fmt {
            "packed" => Ok(Self::Packed),
            "tpm" => Ok(Self::Tpm),
            "android-key" => Ok(Self::AndroidKey),
            "android-safetynet" => Ok(Self::AndroidSafetyNet),
            "apple" => Ok(Self::Apple),
            "fido-u2f" => Ok(Self::FidoU2f),
            "none" => Ok(Self::None),
            other => Err(CeremonyError::UnsupportedAttestationFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for AttestationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded attestation object. The raw authenticator data is retained since
/// attestation signatures cover the exact bytes.
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub format: AttestationFormat,
    pub statement: Vec<(Value, Value)>,
    pub auth_data_bytes: Vec<u8>,
    pub auth_data: AuthenticatorData,
}

const KEY_FMT: &str = "fmt";
const KEY_ATT_STMT: &str = "attStmt";
const KEY_AUTH_DATA: &str = "authData";
/// Top-level entries of a well-formed attestation object
const MAX_OBJECT_ENTRIES: usize = 3;
/// Largest statement among known formats (`tpm`) has six entries
const MAX_STATEMENT_ENTRIES: usize = 8;

impl AttestationObject {
    /// Decode an attestation object.
    ///
    /// Strict mode rejects trailing bytes, duplicate keys and top-level keys
    /// other than `fmt`, `attStmt` and `authData`, and applies the same
    /// strictness to the embedded authenticator data.
    pub fn decode(bytes: &[u8], strict: bool) -> Result<Self> {
        let value = if strict {
            cbor::decode_exact(bytes, "attestation object")?
        } else {
            cbor::decode_prefix(bytes, "attestation object")?.0
        };
        let map = cbor::as_map(&value, "attestation object")?;

        if strict {
            cbor::ensure_unique_keys(map, MAX_OBJECT_ENTRIES, "attestation object")?;
            for (key, _) in map {
                match key.as_text() {
                    Some(KEY_FMT | KEY_ATT_STMT | KEY_AUTH_DATA) => {}
                    _ => {
                        return Err(CeremonyError::malformed(format!(
                            "attestation object: unexpected key {key:?}"
                        )))
                    }
                }
            }
        }

        let required = |key: &str| {
            cbor::text_entry(map, key).ok_or_else(|| {
                CeremonyError::malformed(format!("attestation object: missing {key}"))
            })
        };

        let fmt = cbor::as_text(required(KEY_FMT)?, KEY_FMT)?;
        let format = AttestationFormat::from_fmt(fmt)?;

        let statement = cbor::as_map(required(KEY_ATT_STMT)?, KEY_ATT_STMT)?.to_vec();
        if strict {
            cbor::ensure_unique_keys(&statement, MAX_STATEMENT_ENTRIES, KEY_ATT_STMT)?;
        }

        let auth_data_bytes = cbor::as_bytes(required(KEY_AUTH_DATA)?, KEY_AUTH_DATA)?.to_vec();
        let auth_data = AuthenticatorData::parse(&auth_data_bytes, strict)?;

        tracing::debug!(
            format = %format,
            auth_data_len = auth_data_bytes.len(),
            statement_entries = statement.len(),
            "Decoded attestation object"
        );

        Ok(Self {
            format,
            statement,
            auth_data_bytes,
            auth_data,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = Value::Map(vec![
            (Value::Text(KEY_FMT.into()), Value::Text(self.format.as_str().into())),
            (Value::Text(KEY_ATT_STMT.into()), Value::Map(self.statement.clone())),
            (
                Value::Text(KEY_AUTH_DATA.into()),
                Value::Bytes(self.auth_data_bytes.clone()),
            ),
        ]);
        cbor::encode(&value, "attestation object")
    }

    pub fn statement_entry(&self, key: &str) -> Option<&Value> {
        cbor::text_entry(&self.statement, key)
    }
}
