//! Canonical JSON encoding and SHA-256 digests.
//!
//! Canonical form sorts object keys by UTF-16 code units, collapses
//! integer-valued floats to integers and rejects NaN/Infinity. An optional
//! rounding precision makes float-heavy payloads stable across platforms.

use std::io::Read;
use std::path::Path;

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::domain::error::DigestError;

/// Rewrite `value` into canonical form, rounding floats to `places` decimals
/// when given.
pub fn canonicalize(value: &Value, places: Option<u32>) -> Result<Value, DigestError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key.as_str()], places)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| canonicalize(v, places))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Number(n) if n.is_f64() => {
            let raw = n.as_f64().ok_or(DigestError::NonFiniteNumber)?;
            canonical_number(raw, places)
        }
        other => Ok(other.clone()),
    }
}

fn canonical_number(raw: f64, places: Option<u32>) -> Result<Value, DigestError> {
    if !raw.is_finite() {
        return Err(DigestError::NonFiniteNumber);
    }
    let f = match places {
        Some(p) => round_to(raw, p),
        None => raw,
    };
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        return Ok(Value::Number(Number::from(f as i64)));
    }
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or(DigestError::NonFiniteNumber)
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: u32) -> f64 {
    let scale = 10f64.powi(places.min(15) as i32);
    let scaled = value * scale;
    // Too large to carry any decimals at this precision.
    if !scaled.is_finite() {
        return value;
    }
    let rounded = scaled.round() / scale;
    // -0.0 and 0.0 must encode identically
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Compact canonical JSON text.
pub fn canonical_json(value: &Value) -> Result<String, DigestError> {
    Ok(serde_json::to_string(&canonicalize(value, None)?)?)
}

/// SHA-256 hex digest of the canonical JSON encoding of `value`.
pub fn compute_digest(value: &Value) -> Result<String, DigestError> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

/// Serialize `item` and digest its canonical form.
pub fn digest_of<T: serde::Serialize>(item: &T) -> Result<String, DigestError> {
    compute_digest(&serde_json::to_value(item)?)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stream a file through SHA-256, returning the hex digest and byte length.
pub fn sha256_file(path: &Path) -> Result<(String, u64), DigestError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_field_order_invariant() {
        let a = json!({"zeta": 1, "alpha": {"b": true, "a": null}});
        let b = json!({"alpha": {"a": null, "b": true}, "zeta": 1});
        assert_eq!(
            canonical_json(&a).expect("canonical a"),
            canonical_json(&b).expect("canonical b")
        );
        assert_eq!(
            canonical_json(&a).expect("canonical"),
            r#"{"alpha":{"a":null,"b":true},"zeta":1}"#
        );
    }

    #[test]
    fn test_integer_valued_float_collapses() {
        let canonical = canonical_json(&json!({"value": -3.0})).expect("canonical");
        assert_eq!(canonical, r#"{"value":-3}"#);
    }

    #[test]
    fn test_rounding_absorbs_float_noise() {
        let a = canonicalize(&json!([0.1 + 0.2]), Some(6)).expect("a");
        let b = canonicalize(&json!([0.3]), Some(6)).expect("b");
        assert_eq!(a, b);
        let unrounded = canonicalize(&json!([0.1 + 0.2]), None).expect("raw");
        assert_ne!(unrounded, b);
    }

    #[test]
    fn test_negative_zero_normalized() {
        assert_eq!(round_to(-0.0000001, 3), 0.0);
        assert!(round_to(-0.0000001, 3).is_sign_positive());
    }

    #[test]
    fn test_huge_finite_value_survives_rounding() {
        let huge = 1.0e300;
        assert_eq!(round_to(huge, 15), huge);
        assert_eq!(round_to(-f64::MAX, 6), -f64::MAX);
        let value = canonicalize(&json!({"x": huge}), Some(15)).expect("canonicalize");
        assert_eq!(value["x"].as_f64(), Some(huge));
    }

    #[test]
    fn test_compute_digest_is_hex_sha256() {
        let digest = compute_digest(&json!({"k": "v"})).expect("digest");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, sha256_hex(br#"{"k":"v"}"#));
    }

    #[test]
    fn test_sha256_file_matches_in_memory() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        std::io::Write::write_all(&mut file, b"lab evidence").expect("write");
        let (digest, len) = sha256_file(file.path()).expect("hash file");
        assert_eq!(len, 12);
        assert_eq!(digest, sha256_hex(b"lab evidence"));
    }
}
