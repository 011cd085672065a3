//! JSON shapes exchanged with the browser.
//!
//! Options follow `PublicKeyCredentialCreationOptions` /
//! `PublicKeyCredentialRequestOptions`; responses follow the standard
//! `PublicKeyCredential` JSON serialisation with binary members in base64url.
//! Each is paired with the opaque request id of its ceremony.

use serde::{Deserialize, Serialize};

use crate::codec::{base64url, CoseAlgorithm};
use crate::config::UserVerificationPolicy;
use crate::error::{CeremonyError, Result};
use crate::types::{
    AuthenticatorTransport, CredentialDescriptor, CredentialId, RelyingPartyIdentity, UserIdentity,
};

type ExtensionMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub kind: String,
    pub alg: CoseAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidentKeyRequirement {
    Discouraged,
    Preferred,
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub resident_key: ResidentKeyRequirement,
    pub require_resident_key: bool,
    pub user_verification: UserVerificationPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyance {
    None,
    Indirect,
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialCreationOptions {
    pub rp: RelyingPartyIdentity,
    pub user: UserIdentity,
    #[serde(with = "base64url::serde_bytes")]
    pub challenge: Vec<u8>,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    pub timeout: u32,
    #[serde(default)]
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub authenticator_selection: AuthenticatorSelection,
    pub attestation: AttestationConveyance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialRequestOptions {
    #[serde(with = "base64url::serde_bytes")]
    pub challenge: Vec<u8>,
    pub timeout: u32,
    pub rp_id: String,
    #[serde(default)]
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: UserVerificationPolicy,
}

/// Returned by `start_registration`; `public_key` goes to
/// `navigator.credentials.create()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationChallenge {
    pub request_id: String,
    pub public_key: PublicKeyCredentialCreationOptions,
}

/// Returned by `start_authentication`; `public_key` goes to
/// `navigator.credentials.get()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionChallenge {
    pub request_id: String,
    pub public_key: PublicKeyCredentialRequestOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAttestationResponse {
    #[serde(with = "base64url::serde_bytes")]
    pub attestation_object: Vec<u8>,
    #[serde(rename = "clientDataJSON", with = "base64url::serde_bytes")]
    pub client_data_json: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<AuthenticatorTransport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertionResponse {
    #[serde(with = "base64url::serde_bytes")]
    pub authenticator_data: Vec<u8>,
    #[serde(rename = "clientDataJSON", with = "base64url::serde_bytes")]
    pub client_data_json: Vec<u8>,
    #[serde(with = "base64url::serde_bytes")]
    pub signature: Vec<u8>,
    #[serde(
        default,
        with = "base64url::serde_bytes_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_handle: Option<Vec<u8>>,
}

/// `PublicKeyCredential` JSON, generic over the response kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredential<R> {
    pub id: String,
    #[serde(with = "base64url::serde_bytes")]
    pub raw_id: Vec<u8>,
    #[serde(rename = "type")]
    pub kind: String,
    pub response: R,
    /// Accepted and ignored
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub client_extension_results: ExtensionMap,
}

pub type RegistrationCredential = PublicKeyCredential<AuthenticatorAttestationResponse>;
pub type AssertionCredential = PublicKeyCredential<AuthenticatorAssertionResponse>;

impl<R> PublicKeyCredential<R> {
    pub fn new(raw_id: Vec<u8>, response: R) -> Self {
        Self {
            id: base64url::encode(&raw_id),
            raw_id,
            kind: crate::PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            response,
            client_extension_results: ExtensionMap::new(),
        }
    }

    /// Check `type` and that `id` and `rawId` name the same credential.
    pub fn credential_id(&self) -> Result<CredentialId> {
        if self.kind != crate::PUBLIC_KEY_CREDENTIAL_TYPE {
            return Err(CeremonyError::malformed(format!(
                "credential type must be {}, got {}",
                crate::PUBLIC_KEY_CREDENTIAL_TYPE,
                self.kind
            )));
        }
        if self.raw_id.is_empty() {
            return Err(CeremonyError::malformed("credential rawId is empty"));
        }
        if base64url::decode(&self.id)? != self.raw_id {
            return Err(CeremonyError::malformed("credential id does not match rawId"));
        }
        Ok(CredentialId::new(self.raw_id.clone()))
    }
}

/// Body of a finish-registration call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub request_id: String,
    pub credential: RegistrationCredential,
}

/// Body of a finish-authentication call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    pub request_id: String,
    pub credential: AssertionCredential,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertion_response_from_browser_json() {
        let json = r#"{
            "requestId": "5b0c7f1e",
            "credential": {
                "id": "AQID",
                "rawId": "AQID",
                "type": "public-key",
                "response": {
                    "authenticatorData": "AAAA",
                    "clientDataJSON": "e30",
                    "signature": "MEUC",
                    "userHandle": ""
                },
                "clientExtensionResults": {"credProps": {"rk": true}},
                "authenticatorAttachment": "platform"
            }
        }"#;
        let response: AssertionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.request_id, "5b0c7f1e");
        assert_eq!(response.credential.raw_id, vec![1, 2, 3]);
        assert_eq!(response.credential.response.client_data_json, b"{}");
        // empty userHandle means none
        assert!(response.credential.response.user_handle.is_none());
        assert_eq!(
            response.credential.credential_id().unwrap(),
            CredentialId::new(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_id_raw_id_mismatch_rejected() {
        let mut credential = RegistrationCredential::new(
            vec![1, 2, 3],
            AuthenticatorAttestationResponse {
                attestation_object: vec![],
                client_data_json: vec![],
                transports: vec![],
            },
        );
        assert!(credential.credential_id().is_ok());

        credential.id = base64url::encode(&[9, 9]);
        assert!(matches!(
            credential.credential_id(),
            Err(CeremonyError::MalformedInput(_))
        ));

        credential.id = base64url::encode(&[1, 2, 3]);
        credential.kind = "password".into();
        assert!(credential.credential_id().is_err());
    }

    #[test]
    fn test_creation_options_json_shape() {
        let options = PublicKeyCredentialCreationOptions {
            rp: RelyingPartyIdentity {
                id: "example.com".into(),
                name: "Example".into(),
                icon: None,
            },
            user: UserIdentity::generate("alice", "Alice"),
            challenge: vec![0xfb; 3],
            pub_key_cred_params: vec![PubKeyCredParam {
                kind: "public-key".into(),
                alg: CoseAlgorithm::ES256,
            }],
            timeout: 60_000,
            exclude_credentials: vec![],
            authenticator_selection: AuthenticatorSelection {
                resident_key: ResidentKeyRequirement::Preferred,
                require_resident_key: false,
                user_verification: UserVerificationPolicy::Preferred,
            },
            attestation: AttestationConveyance::None,
        };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["challenge"], "-_v7");
        assert_eq!(json["pubKeyCredParams"][0]["alg"], -7);
        assert_eq!(json["authenticatorSelection"]["residentKey"], "preferred");
        assert_eq!(json["attestation"], "none");
        assert_eq!(json["user"]["name"], "alice");
    }
}
