//! Thin strict layer over `ciborium::Value`.
//!
//! ciborium decodes any well-formed item; the helpers here add the checks a
//! fixed WebAuthn structure needs: exact consumption of the input, expected
//! major types, and duplicate-key detection.

use ciborium::value::Value;

use crate::error::{CeremonyError, Result};

/// Decode one item that must span the whole buffer.
pub(crate) fn decode_exact(bytes: &[u8], what: &str) -> Result<Value> {
    let (value, consumed) = decode_prefix(bytes, what)?;
    if consumed != bytes.len() {
        return Err(CeremonyError::malformed(format!(
            "{what}: {} trailing bytes after CBOR item",
            bytes.len() - consumed
        )));
    }
    Ok(value)
}

/// Decode one item from the front of `bytes`, returning it together with the
/// number of bytes it occupied.
pub(crate) fn decode_prefix(bytes: &[u8], what: &str) -> Result<(Value, usize)> {
    if bytes.is_empty() {
        return Err(CeremonyError::malformed(format!("{what}: empty input")));
    }
    let mut reader = bytes;
    let value: Value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| CeremonyError::malformed(format!("{what}: {e}")))?;
    Ok((value, bytes.len() - reader.len()))
}

pub(crate) fn encode(value: &Value, what: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| CeremonyError::Unexpected(format!("{what}: CBOR encoding failed: {e}")))?;
    Ok(out)
}

pub(crate) fn as_map<'a>(value: &'a Value, what: &str) -> Result<&'a [(Value, Value)]> {
    value
        .as_map()
        .map(Vec::as_slice)
        .ok_or_else(|| CeremonyError::malformed(format!("{what}: expected CBOR map")))
}

pub(crate) fn as_bytes<'a>(value: &'a Value, what: &str) -> Result<&'a [u8]> {
    value
        .as_bytes()
        .map(Vec::as_slice)
        .ok_or_else(|| CeremonyError::malformed(format!("{what}: expected byte string")))
}

pub(crate) fn as_text<'a>(value: &'a Value, what: &str) -> Result<&'a str> {
    value
        .as_text()
        .ok_or_else(|| CeremonyError::malformed(format!("{what}: expected text string")))
}

pub(crate) fn as_array<'a>(value: &'a Value, what: &str) -> Result<&'a [Value]> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| CeremonyError::malformed(format!("{what}: expected CBOR array")))
}

pub(crate) fn as_int(value: &Value, what: &str) -> Result<i64> {
    let integer = value
        .as_integer()
        .ok_or_else(|| CeremonyError::malformed(format!("{what}: expected integer")))?;
    i64::try_from(i128::from(integer))
        .map_err(|_| CeremonyError::malformed(format!("{what}: integer out of range")))
}

pub(crate) fn text_entry<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

pub(crate) fn int_entry(map: &[(Value, Value)], key: i64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(i128::from(key)))
        .map(|(_, v)| v)
}

/// Reject maps longer than `max_entries` or that repeat a key. Keys are
/// compared structurally; the length bound keeps the pairwise scan small.
pub(crate) fn ensure_unique_keys(
    map: &[(Value, Value)],
    max_entries: usize,
    what: &str,
) -> Result<()> {
    if map.len() > max_entries {
        return Err(CeremonyError::malformed(format!(
            "{what}: {} map entries, at most {max_entries} allowed",
            map.len()
        )));
    }
    for (i, (key, _)) in map.iter().enumerate() {
        if map[..i].iter().any(|(earlier, _)| earlier == key) {
            return Err(CeremonyError::malformed(format!(
                "{what}: duplicate map key {key:?}"
            )));
        }
    }
    Ok(())
}

pub(crate) fn int(value: i64) -> Value {
    Value::Integer(value.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_bytes_rejected() {
        // {1: 2} followed by a stray 0x00
        let bytes = [0xa1, 0x01, 0x02, 0x00];
        assert!(decode_exact(&bytes, "test").is_err());
        let (value, consumed) = decode_prefix(&bytes, "test").unwrap();
        assert_eq!(consumed, 3);
        assert!(value.is_map());
    }

    #[test]
    fn test_truncated_input_rejected() {
        // map header announcing one pair, value missing
        let err = decode_exact(&[0xa1, 0x01], "test").unwrap_err();
        assert!(matches!(err, CeremonyError::MalformedInput(_)));
        assert!(decode_exact(&[], "test").is_err());
    }

    #[test]
    fn test_duplicate_keys_detected() {
        let map = vec![(int(1), int(2)), (int(3), int(4)), (int(1), int(5))];
        assert!(ensure_unique_keys(&map, 8, "test").is_err());
        assert!(ensure_unique_keys(&map[..2], 8, "test").is_ok());
    }

    #[test]
    fn test_oversized_map_rejected_before_key_scan() {
        let map: Vec<_> = (0..50_000).map(|i| (int(i), int(0))).collect();
        let err = ensure_unique_keys(&map, 8, "test").unwrap_err();
        assert!(matches!(err, CeremonyError::MalformedInput(ref m) if m.contains("at most 8")));
        assert!(ensure_unique_keys(&map[..8], 8, "test").is_ok());
    }

    #[test]
    fn test_wrong_major_type() {
        let value = Value::Text("not bytes".into());
        assert!(as_bytes(&value, "field").is_err());
        assert_eq!(as_text(&value, "field").unwrap(), "not bytes");
    }
}
