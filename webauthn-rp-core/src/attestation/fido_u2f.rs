//! `fido-u2f` attestation (WebAuthn §8.6).

use ciborium::value::Value;
use openssl::nid::Nid;
use openssl::x509::X509;

use super::{certificate_chain, StatementOutcome};
use crate::codec::{cbor, cose, AuthenticatorData, CoseAlgorithm};
use crate::error::{CeremonyError, Result};

pub(super) fn verify(
    statement: &[(Value, Value)],
    auth_data: &AuthenticatorData,
    client_data_hash: &[u8; 32],
) -> Result<StatementOutcome> {
    let signature = cbor::text_entry(statement, "sig")
        .ok_or_else(|| CeremonyError::malformed("fido-u2f: missing sig"))
        .and_then(|sig| cbor::as_bytes(sig, "fido-u2f sig"))?;
    let x5c = cbor::text_entry(statement, "x5c")
        .ok_or_else(|| CeremonyError::malformed("fido-u2f: missing x5c"))?;
    let chain = certificate_chain(x5c, "fido-u2f x5c")?;
    if chain.len() != 1 {
        return Err(CeremonyError::malformed(format!(
            "fido-u2f: expected exactly one certificate, got {}",
            chain.len()
        )));
    }

    let cert = X509::from_der(&chain[0])
        .map_err(|e| CeremonyError::malformed(format!("fido-u2f: bad certificate: {e}")))?;
    let key = cert
        .public_key()
        .map_err(|e| CeremonyError::malformed(format!("fido-u2f: certificate key: {e}")))?;
    let on_p256 = key
        .ec_key()
        .ok()
        .and_then(|ec| ec.group().curve_name())
        .is_some_and(|nid| nid == Nid::X9_62_PRIME256V1);
    if !on_p256 {
        return Err(CeremonyError::malformed(
            "fido-u2f: attestation key must be EC P-256",
        ));
    }

    let credential = auth_data
        .attested_credential
        .as_ref()
        .ok_or_else(|| CeremonyError::malformed("fido-u2f: no attested credential data"))?;
    let public_key = credential
        .public_key
        .x962_uncompressed()
        .ok_or_else(|| CeremonyError::malformed("fido-u2f: credential key must be EC P-256"))?;

    // 0x00 || rpIdHash || clientDataHash || credentialId || publicKeyU2F
    let mut signed = Vec::with_capacity(1 + 32 + 32 + credential.credential_id.len() + 65);
    signed.push(0x00);
    signed.extend_from_slice(&auth_data.rp_id_hash);
    signed.extend_from_slice(client_data_hash);
    signed.extend_from_slice(&credential.credential_id);
    signed.extend_from_slice(&public_key);

    cose::verify_with_key(CoseAlgorithm::ES256, &key, signature, &signed)?;
    Ok(StatementOutcome::Chain(chain))
}
