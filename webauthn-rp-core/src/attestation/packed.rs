//! `packed` attestation (WebAuthn §8.2).
//!
//! With `x5c` the signature is made by the attestation certificate's key;
//! without it the credential key signs for itself (self attestation).
//! ECDAA is not supported.

use ciborium::value::Value;
use openssl::x509::X509;

use super::{certificate_chain, StatementOutcome};
use crate::codec::{cbor, cose, AuthenticatorData, CoseAlgorithm};
use crate::error::{CeremonyError, Result};

pub(super) fn verify(
    statement: &[(Value, Value)],
    auth_data_bytes: &[u8],
    auth_data: &AuthenticatorData,
    client_data_hash: &[u8; 32],
) -> Result<StatementOutcome> {
    let alg = cbor::text_entry(statement, "alg")
        .ok_or_else(|| CeremonyError::malformed("packed: missing alg"))?;
    let algorithm = CoseAlgorithm::try_from(cbor::as_int(alg, "packed alg")?)?;
    let signature = cbor::text_entry(statement, "sig")
        .ok_or_else(|| CeremonyError::malformed("packed: missing sig"))
        .and_then(|sig| cbor::as_bytes(sig, "packed sig"))?;

    if cbor::text_entry(statement, "ecdaaKeyId").is_some() {
        return Err(CeremonyError::UnsupportedAttestationFormat(
            "packed (ECDAA)".into(),
        ));
    }

    let mut signed = Vec::with_capacity(auth_data_bytes.len() + client_data_hash.len());
    signed.extend_from_slice(auth_data_bytes);
    signed.extend_from_slice(client_data_hash);

    match cbor::text_entry(statement, "x5c") {
        Some(x5c) => {
            let chain = certificate_chain(x5c, "packed x5c")?;
            let leaf = X509::from_der(&chain[0]).map_err(|e| {
                CeremonyError::malformed(format!("packed: bad leaf certificate: {e}"))
            })?;
            // X.509 v3 is encoded as version 2
            if leaf.version() != 2 {
                return Err(CeremonyError::malformed(
                    "packed: attestation certificate must be X.509 v3",
                ));
            }
            let key = leaf
                .public_key()
                .map_err(|e| CeremonyError::malformed(format!("packed: leaf key: {e}")))?;
            cose::verify_with_key(algorithm, &key, signature, &signed)?;
            Ok(StatementOutcome::Chain(chain))
        }
        None => {
            let credential = auth_data
                .attested_credential
                .as_ref()
                .ok_or_else(|| CeremonyError::malformed("packed: no attested credential data"))?;
            if credential.public_key.algorithm != algorithm {
                return Err(CeremonyError::malformed(format!(
                    "packed: self attestation alg {algorithm} does not match credential key {}",
                    credential.public_key.algorithm
                )));
            }
            credential.public_key.verify_signature(signature, &signed)?;
            Ok(StatementOutcome::SelfAttested)
        }
    }
}
