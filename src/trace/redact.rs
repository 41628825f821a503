//! Trace redaction - applied before values reach the collector
//!
//! Binary values in the shared store are redacted to `<binary data: N
//! bytes>`; secrets-like keys (a fixed, case-insensitive list) are replaced
//! with `<REDACTED>` wherever they appear in maps.

use crate::store::Value;

/// Case-insensitive key substrings that mark a value as secret
const SECRET_KEYS: &[&str] = &[
    "password",
    "token",
    "api_key",
    "apikey",
    "secret",
    "client_secret",
    "access_token",
    "authorization",
    "private_key",
];

const REDACTED: &str = "<REDACTED>";

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SECRET_KEYS.iter().any(|s| lower.contains(s))
}

/// Redact a store value into trace-safe JSON
pub fn redact_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Bytes(b) => serde_json::Value::String(format!("<binary data: {} bytes>", b.len())),
        Value::List(items) => serde_json::Value::Array(items.iter().map(redact_value).collect()),
        Value::Map(m) => serde_json::Value::Object(
            m.iter()
                .map(|(k, v)| {
                    if is_secret_key(k) {
                        (k.clone(), serde_json::Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact_value(v))
                    }
                })
                .collect(),
        ),
        other => other.to_json(),
    }
}

/// Redact secret keys in an already-JSON value (MCP arguments and the like)
pub fn redact_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_json).collect())
        }
        serde_json::Value::Object(m) => serde_json::Value::Object(
            m.iter()
                .map(|(k, v)| {
                    if is_secret_key(k) {
                        (k.clone(), serde_json::Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact_json(v))
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
