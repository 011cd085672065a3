//! Binary codec for the structures authenticators produce: CBOR attestation
//! objects, COSE public keys and authenticator data.

pub mod attestation_object;
pub mod authenticator_data;
pub mod base64url;
pub(crate) mod cbor;
pub mod cose;

use sha2::{Digest, Sha256};

pub use attestation_object::{AttestationFormat, AttestationObject};
pub use authenticator_data::{AttestedCredentialData, AuthenticatorData, AuthenticatorFlags};
pub use cose::{CoseAlgorithm, CoseKey, CoseKeyParams};

pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
