//! Canonical serialization of proposals for repeat detection.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::proposal::ChangeProposal;

/// Render `proposal` as compact JSON with object keys sorted.
///
/// Key order inside objects never affects the result; array order does.
pub fn canonical_json(proposal: &ChangeProposal) -> String {
    // `ChangeProposal` only contains strings, integers, arrays and maps, so
    // conversion to `Value` cannot fail.
    let value = serde_json::to_value(proposal).unwrap_or(Value::Null);
    let mut out = String::new();
    write_canonical(&value, &mut out);
    out
}

/// SHA-256 (lowercase hex) of [`canonical_json`].
pub fn proposal_digest(proposal: &ChangeProposal) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(proposal).as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
