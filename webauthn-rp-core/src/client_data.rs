//! `clientDataJSON` handling (WebAuthn §5.8.1).

use serde::Deserialize;

use crate::codec::{base64url, sha256};
use crate::config::RelyingPartyConfig;
use crate::error::{CeremonyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDataType {
    Create,
    Get,
}

impl ClientDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "webauthn.create",
            Self::Get => "webauthn.get",
        }
    }
}

/// The parsed JSON members the relying party checks. Unknown members are
/// ignored, as the JSON is extensible.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default)]
    pub cross_origin: bool,
    #[serde(default)]
    pub top_origin: Option<String>,
}

/// Client data as received, with its hash.
#[derive(Debug, Clone)]
pub struct ClientData {
    pub raw: Vec<u8>,
    /// SHA-256 of `raw`, the `clientDataHash` authenticators sign over
    pub hash: [u8; 32],
    pub collected: CollectedClientData,
}

impl ClientData {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let collected: CollectedClientData = serde_json::from_slice(raw)
            .map_err(|e| CeremonyError::malformed(format!("clientDataJSON: {e}")))?;
        Ok(Self {
            raw: raw.to_vec(),
            hash: sha256(raw),
            collected,
        })
    }

    /// Check challenge, type and origin, in that order.
    pub fn verify(
        &self,
        expected_type: ClientDataType,
        expected_challenge: &[u8],
        config: &RelyingPartyConfig,
    ) -> Result<()> {
        let challenge = base64url::decode(&self.collected.challenge)?;
        if challenge.len() != expected_challenge.len()
            || !openssl::memcmp::eq(&challenge, expected_challenge)
        {
            return Err(CeremonyError::ChallengeMismatch);
        }

        if self.collected.kind != expected_type.as_str() {
            return Err(CeremonyError::TypeMismatch {
                expected: expected_type.as_str(),
                actual: self.collected.kind.clone(),
            });
        }

        if !config.is_origin_allowed(&self.collected.origin) {
            return Err(CeremonyError::OriginNotAllowed(self.collected.origin.clone()));
        }

        if self.collected.cross_origin {
            tracing::debug!(
                origin = %self.collected.origin,
                top_origin = ?self.collected.top_origin,
                "Ceremony performed in a cross-origin iframe"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: [u8; 32] = [9; 32];

    fn config() -> RelyingPartyConfig {
        RelyingPartyConfig::new("example.com", "Example", ["https://example.com"]).unwrap()
    }

    fn client_data(kind: &str, challenge: &[u8], origin: &str) -> ClientData {
        let json = serde_json::json!({
            "type": kind,
            "challenge": base64url::encode(challenge),
            "origin": origin,
            "crossOrigin": false,
            "someFutureMember": 1,
        });
        ClientData::parse(json.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_valid_client_data() {
        let data = client_data("webauthn.create", &CHALLENGE, "https://example.com");
        assert_eq!(data.hash, sha256(&data.raw));
        data.verify(ClientDataType::Create, &CHALLENGE, &config()).unwrap();
    }

    #[test]
    fn test_one_byte_challenge_difference() {
        let mut other = CHALLENGE;
        other[31] ^= 1;
        let data = client_data("webauthn.create", &other, "https://example.com");
        let err = data.verify(ClientDataType::Create, &CHALLENGE, &config()).unwrap_err();
        assert!(matches!(err, CeremonyError::ChallengeMismatch));

        let short = client_data("webauthn.create", &CHALLENGE[..16], "https://example.com");
        assert!(matches!(
            short.verify(ClientDataType::Create, &CHALLENGE, &config()),
            Err(CeremonyError::ChallengeMismatch)
        ));
    }

    #[test]
    fn test_type_and_origin_checks() {
        let get = client_data("webauthn.get", &CHALLENGE, "https://example.com");
        assert!(matches!(
            get.verify(ClientDataType::Create, &CHALLENGE, &config()),
            Err(CeremonyError::TypeMismatch { expected: "webauthn.create", .. })
        ));

        let evil = client_data("webauthn.get", &CHALLENGE, "https://evil.com");
        assert!(matches!(
            evil.verify(ClientDataType::Get, &CHALLENGE, &config()),
            Err(CeremonyError::OriginNotAllowed(ref o)) if o == "https://evil.com"
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ClientData::parse(b"{\"type\": 1"),
            Err(CeremonyError::MalformedInput(_))
        ));
        assert!(ClientData::parse(br#"{"type":"webauthn.get","origin":"x"}"#).is_err());
    }
}
