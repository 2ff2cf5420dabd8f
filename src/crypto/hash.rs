//! Canonical deterministic hashing shared by block mining/validation and
//! transaction signing. Every node must compute byte-identical output for
//! the same logical input or consensus breaks.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively re-sort every object's keys so two structurally-equal values
/// serialize to identical bytes regardless of field insertion order.
/// `serde_json` preserves insertion order by default (or HashMap order
/// without the `preserve_order` feature); canonicalizing explicitly keeps
/// the hash independent of whichever path produced the `Value`.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k, canonicalize(v));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Canonical (sorted-key) JSON encoding of `value`, used both for hashing
/// and as the exact byte payload that gets signed/verified.
pub fn canonical_json_string<T: Serialize>(value: &T) -> String {
    let raw = serde_json::to_value(value).expect("value must serialize to JSON");
    serde_json::to_string(&canonicalize(raw)).expect("canonical value must serialize")
}

/// SHA-256 of the sorted, concatenated canonical-JSON encodings of `args`.
/// Each argument is encoded independently, then the resulting strings are
/// sorted lexicographically before concatenation, matching the reference
/// hashing scheme this consensus rule is ported from.
///
/// Takes already-erased `serde_json::Value`s rather than a homogeneous
/// `&[&T]` so callers can mix field types (a block hashes a timestamp,
/// strings, a transaction list and an integer nonce together) — convert each
/// field with `serde_json::to_value` at the call site.
pub fn hash(args: &[Value]) -> String {
    let mut strings: Vec<String> = args.iter().map(canonical_json_string).collect();
    strings.sort();
    let joined = strings.concat();

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convert a hex string into its zero-padded binary representation, 4 bits
/// per hex digit. Goes through a big integer since a SHA-256 digest (64 hex
/// chars) does not fit in a machine word.
pub fn hex_to_binary(hex_string: &str) -> String {
    let num_of_bits = hex_string.len() * 4;
    let n = num_bigint::BigUint::parse_bytes(hex_string.as_bytes(), 16).unwrap_or_default();
    format!("{:0>width$}", n.to_str_radix(2), width = num_of_bits)
}
