//! Canonical encoding and string codecs.
//!
//! Record digests are computed over a deterministic CBOR encoding
//! (RFC 8949 Core Deterministic Encoding):
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - Floats always use the 8-byte form
//!
//! The canonical encoding is critical: the same value must produce identical
//! bytes (and thus identical digests) on every replica, whatever order its
//! map keys arrived in.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ciborium::value::Value;

use crate::crypto::Address;
use crate::error::CoreError;

/// Digest-input field keys (integer keys for compact encoding).
mod keys {
    pub const VALUE: u64 = 0;
    pub const ADDRESS: u64 = 1;
    pub const TIMESTAMP: u64 = 2;
}

/// Encode an arbitrary JSON value to canonical CBOR bytes.
pub fn canonical_bytes(value: &serde_json::Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &json_to_cbor(value));
    buf
}

/// Build the proof-of-work input for a record.
///
/// Format: canonical CBOR map `{0: value, 1: address_hex, 2: timestamp}`.
/// The nonce is appended by [`crate::pow`] when hashing.
pub fn digest_input(value: &serde_json::Value, address: &Address, timestamp: i64) -> Vec<u8> {
    let entries = vec![
        (Value::Integer(keys::VALUE.into()), json_to_cbor(value)),
        (Value::Integer(keys::ADDRESS.into()), Value::Text(address.to_hex())),
        (Value::Integer(keys::TIMESTAMP.into()), Value::Integer(timestamp.into())),
    ];
    let mut buf = Vec::new();
    encode_map_canonical(&mut buf, &entries);
    buf
}

/// Convert a JSON value into a CBOR value tree.
fn json_to_cbor(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::Integer(u.into())
            } else if let Some(i) = n.as_i64() {
                Value::Integer(i.into())
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_cbor).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Value::Text(k.clone()), json_to_cbor(v)))
                .collect(),
        ),
    }
}

/// Recursively encode a CBOR value.
///
/// Only the shapes produced by [`json_to_cbor`] and [`digest_input`] reach
/// this function; anything else is encoded as null.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr),
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        _ => buf.push(0xf6),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, key_value_pairs.len() as u64);
    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Hex decoding.
pub fn from_hex(s: &str) -> Result<Vec<u8>, CoreError> {
    Ok(hex::decode(s)?)
}

/// Decode hex into a fixed-size array.
pub fn fixed_from_hex<const N: usize>(s: &str, what: &'static str) -> Result<[u8; N], CoreError> {
    let bytes = hex::decode(s)?;
    bytes.as_slice().try_into().map_err(|_| CoreError::InvalidLength {
        what,
        expected: N,
        got: bytes.len(),
    })
}

/// Standard (padded) base64 encoding.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Standard (padded) base64 decoding.
pub fn from_base64(s: &str) -> Result<Vec<u8>, CoreError> {
    Ok(STANDARD.decode(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use serde_json::json;

    #[test]
    fn test_canonical_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":[true,null,"x"]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":[true,null,"x"],"b":1}"#).unwrap();
        assert_eq!(canonical_bytes(&a), canonical_bytes(&b));
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();

        encode_uint(&mut buf, 0, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, vec![0x19, 0x01, 0x00]);

        buf.clear();
        encode_integer(&mut buf, (-1i64).into());
        assert_eq!(buf, vec![0x20]);
    }

    #[test]
    fn test_float_uses_eight_bytes() {
        let bytes = canonical_bytes(&json!(1.5));
        assert_eq!(bytes[0], 0xfb);
        assert_eq!(&bytes[1..], &1.5f64.to_be_bytes());
    }

    #[test]
    fn test_digest_input_binds_every_field() {
        let address = Keypair::from_seed(&[1; 32]).address();
        let other = Keypair::from_seed(&[2; 32]).address();
        let base = digest_input(&json!("v"), &address, 10);

        assert_eq!(base, digest_input(&json!("v"), &address, 10));
        assert_ne!(base, digest_input(&json!("w"), &address, 10));
        assert_ne!(base, digest_input(&json!("v"), &other, 10));
        assert_ne!(base, digest_input(&json!("v"), &address, 11));
    }

    #[test]
    fn test_map_key_ordering() {
        let mut buf = Vec::new();
        let entries = vec![
            (Value::Integer(2.into()), Value::Integer(80.into())),
            (Value::Integer(0.into()), Value::Integer(0.into())),
        ];
        encode_map_canonical(&mut buf, &entries);

        assert_eq!(buf[0], 0xa2);
        assert_eq!(buf[1], 0x00); // key 0
        assert_eq!(buf[2], 0x00);
        assert_eq!(buf[3], 0x02); // key 2
        assert_eq!(buf[4], 0x18);
        assert_eq!(buf[5], 80);
    }

    #[test]
    fn test_base64_and_hex() {
        assert_eq!(to_base64(b"tessera"), "dGVzc2VyYQ==");
        assert_eq!(from_base64("dGVzc2VyYQ==").unwrap(), b"tessera");
        assert_eq!(to_hex(&[0xab, 0x01]), "ab01");
        assert!(fixed_from_hex::<4>("ab01", "test").is_err());
    }
}
