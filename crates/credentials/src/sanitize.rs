//! Payload sanitization before injection into an execution scope.

use serde_json::{Map, Value};

/// Keys that can pollute a prototype chain in downstream JS-based consumers.
const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Deep-copy `value`, dropping forbidden keys at every depth.
///
/// Everything else is preserved by value, so `sanitize(p)` equals `p` for
/// payloads that never used a forbidden key.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

/// Object-level form of [`sanitize`].
pub fn sanitize_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(key, _)| !FORBIDDEN_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), sanitize(value)))
        .collect()
}
