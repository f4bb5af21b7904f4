//! Canonical JSON serialization and SHA-256 hashing.
//!
//! Every hash in the system (audit chain links, approval binding hashes) is
//! computed over this canonical form, so two JSON documents that are equal as
//! values always hash identically regardless of key order or whitespace:
//! - object keys are emitted in ascending byte order, recursively
//! - integers print plainly (no exponent, no trailing zeros)
//! - floats use the shortest round-trip form
//! - no insignificant whitespace

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Serialize a JSON value to its canonical string form.
pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let _ = write!(out, "{}", i);
            } else if let Some(u) = n.as_u64() {
                let _ = write!(out, "{}", u);
            } else {
                // Finite f64; serde_json rejects NaN/Inf at construction.
                let _ = write!(out, "{}", n);
            }
        }
        Value::String(s) => {
            // serde_json performs the escaping; a plain string cannot fail.
            out.push_str(&serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into()));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap_or_else(|_| "\"\"".into()));
                out.push(':');
                write_canonical(&map[k], out);
            }
            out.push('}');
        }
    }
}

/// Hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 over the canonical form of a JSON value.
pub fn canonical_sha256(value: &Value) -> String {
    sha256_hex(to_canonical_json(value).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_recursively() {
        let v = json!({"b": 1, "a": {"z": true, "y": [{"k": 2, "j": 1}]}});
        assert_eq!(to_canonical_json(&v), r#"{"a":{"y":[{"j":1,"k":2}],"z":true},"b":1}"#);
    }

    #[test]
    fn integers_print_plainly() {
        let v = json!({"n": 1000000, "neg": -42, "zero": 0});
        assert_eq!(to_canonical_json(&v), r#"{"n":1000000,"neg":-42,"zero":0}"#);
    }

    #[test]
    fn string_escaping() {
        let v = json!({"s": "a\"b\n"});
        assert_eq!(to_canonical_json(&v), r#"{"s":"a\"b\n"}"#);
    }

    #[test]
    fn equal_values_hash_equal() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x":1,"y":[2,3]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{ "y": [2, 3], "x": 1 }"#).unwrap();
        assert_eq!(canonical_sha256(&a), canonical_sha256(&b));
    }

    #[test]
    fn reparse_is_stable() {
        let v = json!({"b": [1, 2.5, null], "a": "x"});
        let canon = to_canonical_json(&v);
        let reparsed: serde_json::Value = serde_json::from_str(&canon).unwrap();
        assert_eq!(to_canonical_json(&reparsed), canon);
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
