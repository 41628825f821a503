//! JSON-RPC 2.0 Protocol Types for MCP
//!
//! MCP frames every message as JSON-RPC 2.0, newline-delimited over stdio
//! or POSTed over HTTP:
//!
//! ```json
//! {"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {...}}
//! {"jsonrpc": "2.0", "id": 1, "result": {...}}
//! {"jsonrpc": "2.0", "id": 1, "error": {"code": -32600, "message": "..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version this client speaks
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 Request
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Notification - a request without an id; no response comes back
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params: None,
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A null result is still success; only an error object is failure
    pub fn is_success(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }

    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 Error object.
///
/// Standard codes: -32700 parse error, -32600 invalid request, -32601
/// method not found, -32602 invalid params, -32603 internal error.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_with_version() {
        let request = JsonRpcRequest::new(1, "tools/list", json!({}));
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(encoded.contains("\"jsonrpc\":\"2.0\""));
        assert!(encoded.contains("tools/list"));
    }

    #[test]
    fn notification_omits_params_when_none() {
        let notification = JsonRpcNotification::new("notifications/initialized");
        let encoded = serde_json::to_string(&notification).unwrap();
        assert!(!encoded.contains("params"));
    }

    #[test]
    fn response_success_detection() {
        let ok: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "id": 1, "result": {}}"#).unwrap();
        assert!(ok.is_success());

        let err: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "nope"}}"#,
        )
        .unwrap();
        assert!(!err.is_success());
        assert_eq!(err.error.unwrap().code, -32601);
    }

    #[test]
    fn failure_constructor_roundtrips() {
        let response = JsonRpcResponse::failure(Some(3), -32602, "bad params");
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["error"]["code"], json!(-32602));
        assert_eq!(encoded["id"], json!(3));
    }
}
