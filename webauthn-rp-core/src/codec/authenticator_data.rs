//! Authenticator data (WebAuthn §6.1).
//!
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4, BE)
//!   [ aaguid (16) | credIdLen (2, BE) | credId | COSE key ]   if AT
//!   [ extensions CBOR map ]                                   if ED
//! ```

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use super::cbor;
use super::cose::CoseKey;
use crate::error::{CeremonyError, Result};

const RP_ID_HASH_LEN: usize = 32;
const AAGUID_LEN: usize = 16;
const MIN_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
/// Upper bound on credential id length (WebAuthn L3)
pub const MAX_CREDENTIAL_ID_LEN: usize = 1023;

/// Authenticator data flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthenticatorFlags(pub u8);

impl AuthenticatorFlags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const BACKUP_ELIGIBLE: u8 = 0x08;
    pub const BACKED_UP: u8 = 0x10;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;

    fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn user_present(self) -> bool {
        self.has(Self::USER_PRESENT)
    }

    pub fn user_verified(self) -> bool {
        self.has(Self::USER_VERIFIED)
    }

    pub fn backup_eligible(self) -> bool {
        self.has(Self::BACKUP_ELIGIBLE)
    }

    pub fn backed_up(self) -> bool {
        self.has(Self::BACKED_UP)
    }

    pub fn attested_credential_data(self) -> bool {
        self.has(Self::ATTESTED_CREDENTIAL_DATA)
    }

    pub fn extension_data(self) -> bool {
        self.has(Self::EXTENSION_DATA)
    }
}

/// Credential material present when the AT flag is set.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
    pub public_key: CoseKey,
    /// Exact COSE bytes as sent, kept for attestation formats that sign them
    pub public_key_bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: AuthenticatorFlags,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
    pub extensions: Option<Value>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                CeremonyError::malformed(format!(
                    "authenticator data truncated reading {what} at offset {}",
                    self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn advance(&mut self, len: usize) {
        self.pos += len;
    }
}

impl AuthenticatorData {
    /// Parse authenticator data.
    ///
    /// In strict mode bytes left over after the structure the flags declare
    /// are rejected; otherwise they are ignored.
    pub fn parse(bytes: &[u8], strict: bool) -> Result<Self> {
        if bytes.len() < MIN_LEN {
            return Err(CeremonyError::malformed(format!(
                "authenticator data too short: {} bytes, need at least {MIN_LEN}",
                bytes.len()
            )));
        }

        let mut reader = Reader { bytes, pos: 0 };
        let rp_id_hash = reader.array::<RP_ID_HASH_LEN>("rpIdHash")?;
        let flags = AuthenticatorFlags(reader.array::<1>("flags")?[0]);
        let sign_count = u32::from_be_bytes(reader.array::<4>("signCount")?);

        let attested_credential = if flags.attested_credential_data() {
            Some(Self::parse_attested_credential(&mut reader)?)
        } else {
            None
        };

        let extensions = if flags.extension_data() {
            let (value, consumed) = cbor::decode_prefix(reader.remaining(), "extensions")?;
            cbor::as_map(&value, "extensions")?;
            reader.advance(consumed);
            Some(value)
        } else {
            None
        };

        let leftover = reader.remaining().len();
        if leftover > 0 {
            if strict {
                return Err(CeremonyError::malformed(format!(
                    "authenticator data has {leftover} trailing bytes"
                )));
            }
            tracing::debug!(leftover, "Ignoring trailing authenticator data bytes");
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
            extensions,
        })
    }

    fn parse_attested_credential(reader: &mut Reader<'_>) -> Result<AttestedCredentialData> {
        let aaguid = reader.array::<AAGUID_LEN>("aaguid")?;
        let id_len = u16::from_be_bytes(reader.array::<2>("credentialIdLength")?) as usize;
        if id_len == 0 || id_len > MAX_CREDENTIAL_ID_LEN {
            return Err(CeremonyError::malformed(format!(
                "credential id length {id_len} out of range"
            )));
        }
        let credential_id = reader.take(id_len, "credentialId")?.to_vec();

        let (key_value, consumed) =
            cbor::decode_prefix(reader.remaining(), "credential public key")?;
        let public_key_bytes = reader.take(consumed, "credential public key")?.to_vec();
        let public_key = CoseKey::from_value(&key_value)?;

        Ok(AttestedCredentialData {
            aaguid,
            credential_id,
            public_key,
            public_key_bytes,
        })
    }

    /// Serialise back to the wire layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(MIN_LEN + 128);
        out.extend_from_slice(&self.rp_id_hash);
        out.push(self.flags.0);
        out.extend_from_slice(&self.sign_count.to_be_bytes());

        if let Some(cred) = &self.attested_credential {
            let id_len = u16::try_from(cred.credential_id.len())
                .ok()
                .filter(|len| usize::from(*len) <= MAX_CREDENTIAL_ID_LEN)
                .ok_or_else(|| CeremonyError::malformed("credential id too long"))?;
            out.extend_from_slice(&cred.aaguid);
            out.extend_from_slice(&id_len.to_be_bytes());
            out.extend_from_slice(&cred.credential_id);
            out.extend_from_slice(&cred.public_key_bytes);
        }

        if let Some(extensions) = &self.extensions {
            out.extend(cbor::encode(extensions, "extensions")?);
        }
        Ok(out)
    }

    pub fn verify_rp_id_hash(&self, expected: &[u8; RP_ID_HASH_LEN]) -> Result<()> {
        if openssl::memcmp::eq(&self.rp_id_hash, expected) {
            Ok(())
        } else {
            Err(CeremonyError::RpIdMismatch {
                expected: hex::encode(expected),
                actual: hex::encode(self.rp_id_hash),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sha256;

    fn ed25519_key() -> CoseKey {
        CoseKey::ed25519(vec![7; 32]).unwrap()
    }

    fn sample(flags: u8, with_credential: bool) -> AuthenticatorData {
        let attested_credential = with_credential.then(|| {
            let key = ed25519_key();
            AttestedCredentialData {
                aaguid: [0xAA; 16],
                credential_id: vec![1, 2, 3, 4],
                public_key_bytes: key.to_bytes().unwrap(),
                public_key: key,
            }
        });
        AuthenticatorData {
            rp_id_hash: sha256(b"example.com"),
            flags: AuthenticatorFlags(flags),
            sign_count: 42,
            attested_credential,
            extensions: None,
        }
    }

    #[test]
    fn test_parse_assertion_layout() {
        let data = sample(AuthenticatorFlags::USER_PRESENT, false);
        let bytes = data.to_bytes().unwrap();
        assert_eq!(bytes.len(), 37);
        assert_eq!(&bytes[33..37], &[0, 0, 0, 42]);

        let parsed = AuthenticatorData::parse(&bytes, true).unwrap();
        assert_eq!(parsed, data);
        assert!(parsed.flags.user_present());
        assert!(!parsed.flags.user_verified());
    }

    #[test]
    fn test_parse_attested_credential() {
        let data = sample(
            AuthenticatorFlags::USER_PRESENT | AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA,
            true,
        );
        let parsed = AuthenticatorData::parse(&data.to_bytes().unwrap(), true).unwrap();
        let cred = parsed.attested_credential.unwrap();
        assert_eq!(cred.credential_id, vec![1, 2, 3, 4]);
        assert_eq!(cred.public_key, ed25519_key());
    }

    #[test]
    fn test_truncated_buffers_rejected() {
        let bytes = sample(
            AuthenticatorFlags::USER_PRESENT | AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA,
            true,
        )
        .to_bytes()
        .unwrap();
        for len in [0, 10, 36, 40, 54, 56, bytes.len() - 1] {
            let err = AuthenticatorData::parse(&bytes[..len], true).unwrap_err();
            assert!(
                matches!(err, CeremonyError::MalformedInput(_)),
                "length {len} should be malformed"
            );
        }
    }

    #[test]
    fn test_trailing_bytes_depend_on_strictness() {
        let mut bytes = sample(AuthenticatorFlags::USER_PRESENT, false)
            .to_bytes()
            .unwrap();
        bytes.push(0xFF);
        assert!(AuthenticatorData::parse(&bytes, true).is_err());
        assert_eq!(AuthenticatorData::parse(&bytes, false).unwrap().sign_count, 42);
    }

    #[test]
    fn test_extensions_decoded() {
        let mut data = sample(
            AuthenticatorFlags::USER_PRESENT | AuthenticatorFlags::EXTENSION_DATA,
            false,
        );
        data.extensions = Some(Value::Map(vec![(
            Value::Text("credProtect".into()),
            cbor::int(2),
        )]));
        let parsed = AuthenticatorData::parse(&data.to_bytes().unwrap(), true).unwrap();
        assert_eq!(parsed.extensions, data.extensions);
    }

    #[test]
    fn test_extension_flag_without_data_rejected() {
        let bytes = sample(
            AuthenticatorFlags::USER_PRESENT | AuthenticatorFlags::EXTENSION_DATA,
            false,
        )
        .to_bytes()
        .unwrap();
        assert!(AuthenticatorData::parse(&bytes, false).is_err());
    }

    #[test]
    fn test_rp_id_hash_mismatch() {
        let data = sample(AuthenticatorFlags::USER_PRESENT, false);
        data.verify_rp_id_hash(&sha256(b"example.com")).unwrap();
        let err = data.verify_rp_id_hash(&sha256(b"evil.com")).unwrap_err();
        assert!(matches!(err, CeremonyError::RpIdMismatch { .. }));
    }
}
