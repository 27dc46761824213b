//! Canonical JSON — the single root of signing, hashing, and equality.
//!
//! Everything that is signed (envelope messages), hashed (intent
//! fingerprints, commit hashes, transcript hashes, idempotency keys), or
//! compared for identity goes through [`canonical_json`]. Object keys are
//! sorted lexicographically by byte order, there is no insignificant
//! whitespace, and numbers are rendered through `serde_json::Number`'s
//! single grammar. Monetary values never appear as JSON numbers — `Decimal`
//! serializes as a string — so float formatting cannot perturb a hash.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{PactError, Result};

/// Render a JSON value in canonical form.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::with_capacity(256);
    write_canonical(&mut out, value);
    out
}

/// Canonical form as bytes, ready for signing or hashing.
#[must_use]
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    canonical_json(value).into_bytes()
}

/// SHA-256 of the canonical form, hex-encoded.
#[must_use]
pub fn sha256_hex(value: &Value) -> String {
    sha256_hex_bytes(&canonical_bytes(value))
}

/// SHA-256 of raw bytes, hex-encoded.
#[must_use]
pub fn sha256_hex_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The hash a hash-reveal COMMIT binds to: a domain-tagged SHA-256 over the
/// base64 payload and nonce. REVEAL verification recomputes this.
#[must_use]
pub fn commit_reveal_hash(payload_b64: &str, nonce_b64: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"pact:commit:v3:");
    hasher.update(payload_b64.as_bytes());
    hasher.update(b":");
    hasher.update(nonce_b64.as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize any value into a `serde_json::Value` for canonicalization.
pub fn to_canonical_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| PactError::internal(format!("canonicalization failed: {e}")))
}

/// Canonical JSON of any serializable value.
pub fn canonical_json_of<T: Serialize>(value: &T) -> Result<String> {
    Ok(canonical_json(&to_canonical_value(value)?))
}

/// SHA-256 hex of any serializable value's canonical form.
pub fn sha256_hex_of<T: Serialize>(value: &T) -> Result<String> {
    Ok(sha256_hex(&to_canonical_value(value)?))
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // serde_json's map is already BTree-ordered without the
            // `preserve_order` feature, but the sort is an invariant here,
            // not an implementation accident.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(out, key);
                out.push(':');
                write_canonical(out, &map[key.as_str()]);
            }
            out.push('}');
        }
    }
}

fn write_escaped(out: &mut String, s: &str) {
    use std::fmt::Write;

    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                // Infallible: writing to a String cannot error.
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn keys_sorted_no_whitespace() {
        let v = json!({"zeta": 1, "alpha": {"b": true, "a": null}});
        assert_eq!(
            canonical_json(&v),
            r#"{"alpha":{"a":null,"b":true},"zeta":1}"#
        );
    }

    #[test]
    fn arrays_preserve_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_json(&v), "[3,1,2]");
    }

    #[test]
    fn strings_escaped() {
        let v = json!({"k": "line\nbreak \"q\" \\ tab\t"});
        assert_eq!(
            canonical_json(&v),
            r#"{"k":"line\nbreak \"q\" \\ tab\t"}"#
        );
    }

    #[test]
    fn control_chars_escaped_as_unicode() {
        let v = Value::String("\u{01}".to_string());
        assert_eq!(canonical_json(&v), "\"\\u0001\"");
    }

    #[test]
    fn hash_stable_across_key_order() {
        let a = json!({"x": 1, "y": "z"});
        let b = json!({"y": "z", "x": 1});
        assert_eq!(sha256_hex(&a), sha256_hex(&b));
    }

    #[test]
    fn hash_differs_on_value_change() {
        let a = json!({"x": 1});
        let b = json!({"x": 2});
        assert_ne!(sha256_hex(&a), sha256_hex(&b));
    }

    #[test]
    fn decimal_renders_as_string() {
        use rust_decimal::Decimal;
        let v = to_canonical_value(&Decimal::new(12345, 4)).unwrap();
        assert_eq!(canonical_json(&v), r#""1.2345""#);
    }
}
