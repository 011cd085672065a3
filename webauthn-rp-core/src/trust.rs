//! Attestation trust evaluation
//!
//! The engine verifies attestation signatures itself but leaves the question
//! "do we trust whoever issued this certificate chain" to an
//! [`AttestationTrustService`]. [`MetadataTrustService`] is a small reference
//! implementation: a static table of known authenticator models plus an
//! optional set of trusted root certificates.

use std::collections::HashMap;

use async_trait::async_trait;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509StoreContext, X509VerifyResult, X509};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::AttestationFormat;

/// Trust service errors
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("Trust service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid trust anchor: {0}")]
    InvalidAnchor(String),
}

/// Verdict of the trust service on an attestation certificate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustVerdict {
    Trusted,
    Untrusted,
    /// The service has no opinion (no anchors for this authenticator)
    Unknown,
}

/// Trust level recorded with a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationTrust {
    /// Chain verified to a trusted anchor
    Trusted,
    /// Chain present but not trusted
    Untrusted,
    /// Chain present, trust service had no opinion
    Unknown,
    /// Signed by the credential key itself
    SelfAttested,
    /// `none` attestation
    None,
}

impl From<TrustVerdict> for AttestationTrust {
    fn from(verdict: TrustVerdict) -> Self {
        match verdict {
            TrustVerdict::Trusted => Self::Trusted,
            TrustVerdict::Untrusted => Self::Untrusted,
            TrustVerdict::Unknown => Self::Unknown,
        }
    }
}

/// Authenticator facts passed along with the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorMetadata {
    pub aaguid: Uuid,
    pub format: AttestationFormat,
}

/// Device model information, looked up by AAGUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    pub aaguid: Uuid,
    /// Human-readable description
    pub description: String,
    /// Device manufacturer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

/// External attestation trust policy.
///
/// Implementations must be thread-safe (`Send + Sync`) and may perform I/O.
#[async_trait]
pub trait AttestationTrustService: Send + Sync {
    /// Judge a DER certificate chain, leaf first.
    async fn evaluate(
        &self,
        chain: &[Vec<u8>],
        metadata: &AuthenticatorMetadata,
    ) -> Result<TrustVerdict, TrustError>;

    /// Describe the authenticator model, if known.
    async fn device_model(&self, aaguid: &Uuid) -> Result<Option<DeviceModel>, TrustError> {
        let _ = aaguid;
        Ok(None)
    }
}

/// Known authenticator AAGUIDs with their descriptions
static KNOWN_AUTHENTICATORS: &[(&str, &str, &str)] = &[
    // Apple
    ("f24a8e70-d0d3-f82c-2937-32523cc4de5a", "Apple iCloud Keychain", "Apple"),
    ("dd4ec289-e01d-41c9-bb89-70fa845d4bf2", "iCloud Keychain (Managed)", "Apple"),
    // Google
    ("adce0002-35bc-c60a-648b-0b25f1f05503", "Chrome on Mac", "Google"),
    ("ea9b8d66-4d01-1d21-3ce4-b6b48cb575d4", "Google Password Manager", "Google"),
    // Microsoft
    ("6028b017-b1d4-4c02-b4b3-afcdafc96bb2", "Windows Hello", "Microsoft"),
    ("08987058-cadc-4b81-b6e1-30de50dcbe96", "Windows Hello Hardware", "Microsoft"),
    // Yubico
    ("cb69481e-8ff7-4039-93ec-0a2729a154a8", "YubiKey 5 Series", "Yubico"),
    ("ee882879-721c-4913-9775-3dfcce97072a", "YubiKey 5 NFC", "Yubico"),
    ("2fc0579f-8113-47ea-b116-bb5a8db9202a", "YubiKey 5 NFC", "Yubico"),
    ("c5ef55ff-ad9a-4b9f-b580-adebafe026d0", "YubiKey 5Ci", "Yubico"),
    ("fa2b99dc-9e39-4257-8f92-4a30d23c4118", "YubiKey 5 FIPS", "Yubico"),
    ("73bb0cd4-e502-49b8-9c6f-b59445bf720b", "YubiKey 5 Bio", "Yubico"),
    ("149a2021-8ef6-4133-96b8-81f8d5b7f1f5", "Security Key by Yubico", "Yubico"),
    // Feitian
    ("77010bd7-212a-4fc9-b236-d2ca5e9d4084", "Feitian BioPass FIDO2", "Feitian"),
    ("3e22415d-7fdf-4ea4-8a0c-dd60c4249b9d", "Feitian ePass FIDO2", "Feitian"),
    // Password managers
    ("bada5566-a7aa-401f-bd96-45619a55120d", "1Password", "1Password"),
    ("d548826e-79b4-db40-a3d8-11116f7e8349", "Bitwarden", "Bitwarden"),
    ("531126d6-e717-415c-9320-3d9aa6981239", "Dashlane", "Dashlane"),
    // Samsung
    ("53414d53-554e-4700-0000-000000000000", "Samsung Pass", "Samsung"),
];

/// Trust service backed by a static AAGUID table and configured root
/// certificates.
///
/// Verdicts: `Trusted` when the chain verifies to a configured root,
/// `Untrusted` when roots are configured and it does not, `Unknown` when no
/// roots are configured at all.
pub struct MetadataTrustService {
    roots: Vec<X509>,
    models: HashMap<Uuid, DeviceModel>,
}

impl Default for MetadataTrustService {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataTrustService {
    /// Service with the built-in model table and no trust anchors.
    pub fn new() -> Self {
        let models = KNOWN_AUTHENTICATORS
            .iter()
            .filter_map(|(aaguid, description, vendor)| {
                let aaguid = Uuid::parse_str(aaguid).ok()?;
                Some((
                    aaguid,
                    DeviceModel {
                        aaguid,
                        description: description.to_string(),
                        vendor: Some(vendor.to_string()),
                    },
                ))
            })
            .collect();
        Self {
            roots: Vec::new(),
            models,
        }
    }

    /// Add a trusted root from DER bytes.
    pub fn with_root_der(mut self, der: &[u8]) -> Result<Self, TrustError> {
        let root = X509::from_der(der).map_err(|e| TrustError::InvalidAnchor(e.to_string()))?;
        self.roots.push(root);
        Ok(self)
    }

    /// Add trusted roots from a PEM bundle.
    pub fn with_roots_pem(mut self, pem: &[u8]) -> Result<Self, TrustError> {
        let roots =
            X509::stack_from_pem(pem).map_err(|e| TrustError::InvalidAnchor(e.to_string()))?;
        if roots.is_empty() {
            return Err(TrustError::InvalidAnchor("no certificates in PEM".into()));
        }
        self.roots.extend(roots);
        Ok(self)
    }

    /// Register or replace a device model.
    pub fn with_model(mut self, model: DeviceModel) -> Self {
        self.models.insert(model.aaguid, model);
        self
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    fn verify_chain(&self, chain: &[Vec<u8>]) -> Result<bool, openssl::error::ErrorStack> {
        let mut certs = chain.iter().map(|der| X509::from_der(der));
        let Some(leaf) = certs.next().transpose()? else {
            return Ok(false);
        };

        let mut intermediates = Stack::new()?;
        for cert in certs {
            intermediates.push(cert?)?;
        }

        let mut store = X509StoreBuilder::new()?;
        for root in &self.roots {
            store.add_cert(root.clone())?;
        }
        let store = store.build();

        let mut context = X509StoreContext::new()?;
        context.init(&store, &leaf, &intermediates, |ctx| {
            let verified = ctx.verify_cert()?;
            if !verified {
                tracing::debug!(reason = %ctx.error(), "Attestation chain rejected");
            }
            Ok(verified && ctx.error() == X509VerifyResult::OK)
        })
    }
}

#[async_trait]
impl AttestationTrustService for MetadataTrustService {
    async fn evaluate(
        &self,
        chain: &[Vec<u8>],
        metadata: &AuthenticatorMetadata,
    ) -> Result<TrustVerdict, TrustError> {
        if self.roots.is_empty() {
            return Ok(TrustVerdict::Unknown);
        }
        let verdict = match self.verify_chain(chain) {
            Ok(true) => TrustVerdict::Trusted,
            Ok(false) => TrustVerdict::Untrusted,
            Err(e) => {
                tracing::warn!(
                    aaguid = %metadata.aaguid,
                    format = %metadata.format,
                    error = %e,
                    "Attestation chain could not be processed"
                );
                TrustVerdict::Untrusted
            }
        };
        tracing::debug!(aaguid = %metadata.aaguid, ?verdict, "Attestation chain evaluated");
        Ok(verdict)
    }

    async fn device_model(&self, aaguid: &Uuid) -> Result<Option<DeviceModel>, TrustError> {
        Ok(self.models.get(aaguid).cloned())
    }
}

impl std::fmt::Debug for MetadataTrustService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTrustService")
            .field("roots", &self.roots.len())
            .field("models", &self.models.len())
            .finish()
    }
}
