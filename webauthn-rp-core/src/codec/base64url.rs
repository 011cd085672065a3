//! Base64url (RFC 4648 §5, no padding) as used by the WebAuthn JSON shapes.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::{CeremonyError, Result};

pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url. Trailing `=` padding is tolerated since some clients
/// emit it even though the JSON shapes forbid it.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|e| CeremonyError::malformed(format!("invalid base64url: {e}")))
}

/// Serde adapter for `Vec<u8>` fields carried as base64url strings.
pub mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Same as [`serde_bytes`] for optional fields.
pub mod serde_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&super::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) if !encoded.is_empty() => super::decode(&encoded)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_is_tolerated() {
        assert_eq!(decode("AQI").unwrap(), vec![1, 2]);
        assert_eq!(decode("AQI=").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_standard_alphabet_rejected() {
        // '+' and '/' belong to the standard alphabet, not base64url
        assert!(decode("+/8").is_err());
        assert_eq!(encode(&[0xfb, 0xff]), "-_8");
    }
}
