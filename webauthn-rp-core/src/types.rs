//! Identity and credential descriptor types shared by every ceremony.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::codec::base64url;
use crate::error::{CeremonyError, Result};

const USER_HANDLE_LEN: usize = 32;
/// WebAuthn caps user handles at 64 bytes
pub const MAX_USER_HANDLE_LEN: usize = 64;

/// Opaque credential identifier chosen by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CredentialId(#[serde(with = "base64url::serde_bytes")] Vec<u8>);

impl CredentialId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let bytes = base64url::decode(encoded)?;
        if bytes.is_empty() {
            return Err(CeremonyError::malformed("credential id is empty"));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        base64url::encode(&self.0)
    }
}

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64url())
    }
}

impl AsRef<[u8]> for CredentialId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Stable, never reused per-user identifier handed to authenticators.
/// Contains no personally identifying information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserHandle(#[serde(with = "base64url::serde_bytes")] Vec<u8>);

impl UserHandle {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_USER_HANDLE_LEN {
            return Err(CeremonyError::malformed(format!(
                "user handle must be 1..={MAX_USER_HANDLE_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Fresh random handle from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; USER_HANDLE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for UserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&base64url::encode(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyIdentity {
    /// RP ID: the effective domain credentials are scoped to
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    #[serde(rename = "id")]
    pub handle: UserHandle,
    pub name: String,
    pub display_name: String,
}

impl UserIdentity {
    pub fn new(
        handle: UserHandle,
        name: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            name: name.into(),
            display_name: display_name.into(),
        }
    }

    /// New user with a freshly generated handle.
    pub fn generate(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(UserHandle::generate(), name, display_name)
    }
}

/// Transport hint reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorTransport {
    Usb,
    Nfc,
    Ble,
    SmartCard,
    Hybrid,
    Internal,
    /// Hints this relying party does not know about are kept but ignored
    #[serde(other)]
    Unknown,
}

/// `PublicKeyCredentialDescriptor` as placed in allow/exclude lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: CredentialId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<AuthenticatorTransport>,
}

impl CredentialDescriptor {
    pub fn new(id: CredentialId, transports: Vec<AuthenticatorTransport>) -> Self {
        Self {
            kind: crate::PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            id,
            transports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_handles_are_distinct() {
        let a = UserHandle::generate();
        let b = UserHandle::generate();
        assert_eq!(a.as_bytes().len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_handle_bounds() {
        assert!(UserHandle::new(Vec::new()).is_err());
        assert!(UserHandle::new(vec![0; 65]).is_err());
        assert!(UserHandle::new(vec![0; 64]).is_ok());
    }

    #[test]
    fn test_user_identity_json_shape() {
        let user = UserIdentity::new(UserHandle::new(vec![1, 2, 3]).unwrap(), "alice", "Alice");
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["id"], "AQID");
        assert_eq!(json["displayName"], "Alice");
    }

    #[test]
    fn test_unknown_transport_tolerated() {
        let transports: Vec<AuthenticatorTransport> =
            serde_json::from_str(r#"["usb","smart-card","quantum"]"#).unwrap();
        assert_eq!(
            transports,
            vec![
                AuthenticatorTransport::Usb,
                AuthenticatorTransport::SmartCard,
                AuthenticatorTransport::Unknown
            ]
        );
    }

    #[test]
    fn test_credential_descriptor_json_shape() {
        let descriptor = CredentialDescriptor::new(CredentialId::new(vec![0xfb, 0xff]), vec![]);
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["type"], "public-key");
        assert_eq!(json["id"], "-_8");
        assert!(json.get("transports").is_none());
    }
}
