//! Default JSON payload decoder.
//!
//! Parses a JSON payload and recurses through objects/arrays, emitting one
//! [`DecodedLeaf`] per leaf scalar. An object with exactly the two keys
//! `value` and `timestamp` (case-insensitive) is treated as a leaf, not
//! descended into — this is the `{value, timestamp}` convention
//! Socket.IO-style connections rely on.

use serde_json::Value;

/// One leaf value extracted from a payload, with its `/`-joined topic
/// (relative to the connection's base path) and an optional timestamp
/// carried by a `{value, timestamp}` leaf object.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLeaf {
    pub topic: String,
    pub value: Value,
    pub timestamp_ms: Option<i64>,
}

/// Decode a JSON payload into leaf data points, topics rooted at `base_path`.
pub fn decode_leaves(base_path: &str, payload: &Value) -> Vec<DecodedLeaf> {
    let mut out = Vec::new();
    walk(base_path, payload, &mut out);
    out
}

/// Parse raw bytes as JSON, then decode leaves. Returns `None` on parse
/// failure — callers treat that as a Decode-kind error and drop
/// the message without retry.
pub fn decode_leaves_from_bytes(base_path: &str, bytes: &[u8]) -> Option<Vec<DecodedLeaf>> {
    let payload: Value = serde_json::from_slice(bytes).ok()?;
    Some(decode_leaves(base_path, &payload))
}

fn walk(path: &str, value: &Value, out: &mut Vec<DecodedLeaf>) {
    match value {
        Value::Object(map) => {
            if let Some(leaf) = as_value_timestamp_leaf(map) {
                out.push(DecodedLeaf {
                    topic: path.to_string(),
                    value: type_leaf(&leaf.0),
                    timestamp_ms: leaf.1,
                });
                return;
            }
            for (key, child) in map {
                let child_path = join(path, key);
                walk(&child_path, child, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                let child_path = join(path, &i.to_string());
                walk(&child_path, child, out);
            }
        }
        leaf => out.push(DecodedLeaf {
            topic: path.to_string(),
            value: type_leaf(leaf),
            timestamp_ms: None,
        }),
    }
}

/// An object with exactly the two keys `value`/`timestamp` (any case) is a
/// leaf, not a branch.
fn as_value_timestamp_leaf(map: &serde_json::Map<String, Value>) -> Option<(Value, Option<i64>)> {
    if map.len() != 2 {
        return None;
    }
    let mut value = None;
    let mut timestamp = None;
    for (key, v) in map {
        match key.to_lowercase().as_str() {
            "value" => value = Some(v.clone()),
            "timestamp" => timestamp = Some(v.clone()),
            _ => return None,
        }
    }
    let value = value?;
    let timestamp_ms = timestamp.and_then(|t| match t {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    });
    Some((value, timestamp_ms))
}

/// Re-type a raw JSON scalar: string -> string,
/// integer-parsable number -> int64, else double, bool -> bool, null ->
/// null, anything else left as-is (raw text equivalent).
fn type_leaf(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(f) = n.as_f64() {
                Value::from(f)
            } else {
                value.clone()
            }
        }
        other => other.clone(),
    }
}

fn join(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}/{segment}")
    }
}
