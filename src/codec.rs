//! Raw response decoding and coil state conversion

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::error::CallError;
use crate::protocol::{COIL_OFF, COIL_ON};

/// Result handed back to the RPC layer
///
/// Serializes untagged: `1` or `[1, 2]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DecodedResult {
    Single(u16),
    Sequence(Vec<u16>),
}

impl From<Vec<u16>> for DecodedResult {
    fn from(values: Vec<u16>) -> Self {
        DecodedResult::Sequence(values)
    }
}

/// Decode a raw response payload into 16-bit values
///
/// Odd-length payloads (bit reads, byte-count-prefixed streams) yield one value
/// per byte. Even-length payloads are read as big-endian words. The parity rule
/// matches what deployed devices return and must not be tightened.
pub fn decode(raw: &[u8]) -> Vec<u16> {
    if raw.len() % 2 != 0 {
        return raw.iter().map(|&b| u16::from(b)).collect();
    }

    raw.chunks_exact(2).map(BigEndian::read_u16).collect()
}

/// Convert a caller-supplied coil state (0 or 1) to its wire value
pub fn encode_coil(value: u16) -> Result<u16, CallError> {
    match value {
        0 => Ok(COIL_OFF),
        1 => Ok(COIL_ON),
        other => Err(CallError::invalid_value(
            "bad value. only 0 or 1 allowed",
            i64::from(other),
        )),
    }
}

/// Replace a leading `0xFF00` with `1`
pub fn normalize_coil_ack(mut values: Vec<u16>) -> Vec<u16> {
    if let Some(first) = values.first_mut() {
        if *first == COIL_ON {
            *first = 1;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_even_length() {
        assert_eq!(decode(&[0x00, 0x0A, 0x00, 0x14]), vec![10, 20]);
        assert_eq!(decode(&[0xFF, 0x00]), vec![0xFF00]);
        assert_eq!(decode(&[0x12, 0x34, 0xAB, 0xCD, 0x00, 0x01]), vec![0x1234, 0xABCD, 0x0001]);
    }

    #[test]
    fn test_decode_odd_length() {
        assert_eq!(decode(&[0x05]), vec![5]);
        assert_eq!(decode(&[0xFF, 0x00, 0x80]), vec![0xFF, 0x00, 0x80]);
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode(&[]).is_empty());
    }

    #[test]
    fn test_odd_length_is_bytewise_for_any_content() {
        for len in [1usize, 3, 5, 7, 251] {
            let raw: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            let decoded = decode(&raw);
            assert_eq!(decoded.len(), len);
            assert!(decoded.iter().zip(&raw).all(|(&v, &b)| v == u16::from(b)));
        }
    }

    #[test]
    fn test_encode_coil() {
        assert_eq!(encode_coil(0).unwrap(), 0x0000);
        assert_eq!(encode_coil(1).unwrap(), 0xFF00);

        let err = encode_coil(2).unwrap_err();
        assert_eq!(err, CallError::invalid_value("bad value. only 0 or 1 allowed", 2));
    }

    #[test]
    fn test_normalize_coil_ack() {
        assert_eq!(normalize_coil_ack(vec![0xFF00]), vec![1]);
        assert_eq!(normalize_coil_ack(vec![0x0000]), vec![0]);
        assert_eq!(normalize_coil_ack(vec![0x0001, 0xFF00]), vec![0x0001, 0xFF00]);
        assert!(normalize_coil_ack(Vec::new()).is_empty());
    }

    #[test]
    fn test_result_serialization() {
        assert_eq!(serde_json::to_string(&DecodedResult::Single(1)).unwrap(), "1");
        assert_eq!(serde_json::to_string(&DecodedResult::from(vec![1, 2])).unwrap(), "[1,2]");
    }
}
