//! HTTP node - fetch a URL, store response and status code
//!
//! Text and JSON responses land as string/structured values so downstream
//! templates can traverse them; anything else stays as raw bytes and rides
//! the single-reference template rule untouched.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{PflowError, Result};
use crate::node::{NodeBehavior, RunContext};
use crate::store::{Value, ValueMap};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REDIRECT_LIMIT: usize = 10;

/// How much of an error response body to keep for the error record
const ERROR_BODY_LIMIT: usize = 2048;

pub struct HttpNode {
    client: reqwest::Client,
}

impl Default for HttpNode {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(REDIRECT_LIMIT))
            .user_agent(concat!("pflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("HTTP client construction only fails on TLS misconfiguration");
        Self { client }
    }
}

#[async_trait]
impl NodeBehavior for HttpNode {
    async fn exec(&self, ctx: &RunContext, _prep: Value) -> Result<Value> {
        let url = ctx.param_str("url")?;
        let method = ctx.param_str_opt("method").unwrap_or("GET");
        let timeout = ctx
            .param("timeout_secs")
            .and_then(Value::as_int)
            .map(|s| Duration::from_secs(s.max(1) as u64))
            .unwrap_or(DEFAULT_TIMEOUT);

        let mut request = match method.to_ascii_uppercase().as_str() {
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            "HEAD" => self.client.head(url),
            _ => self.client.get(url),
        }
        .timeout(timeout);

        if let Some(Value::Map(headers)) = ctx.param("headers") {
            for (key, value) in headers {
                if let Some(v) = value.embed_string() {
                    request = request.header(key.as_str(), v);
                }
            }
        }
        if let Some(body) = ctx.param("body") {
            request = match body {
                Value::Bytes(b) => request.body(b.to_vec()),
                other => request.body(other.embed_string().unwrap_or_default()),
            };
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PflowError::NodeTimeout {
                    node_id: ctx.node_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                PflowError::node_runtime(ctx.node_id.as_ref(), format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let raw = response.bytes().await.map_err(|e| {
            PflowError::node_runtime(ctx.node_id.as_ref(), format!("failed to read response: {e}"))
        })?;

        if status >= 400 {
            let body = String::from_utf8_lossy(&raw);
            let body = body.chars().take(ERROR_BODY_LIMIT).collect::<String>();
            return Err(PflowError::HttpStatus { status, body });
        }

        let mut outputs = ValueMap::new();
        outputs.insert("response".to_string(), decode_body(&content_type, raw));
        outputs.insert("status_code".to_string(), Value::Int(status as i64));
        Ok(Value::Map(outputs))
    }
}

/// Decode the response by content type: JSON → structured, text → string,
/// anything else → bytes.
fn decode_body(content_type: &str, raw: Bytes) -> Value {
    if content_type.contains("json") {
        if let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&raw) {
            return Value::from(parsed);
        }
    }
    let is_texty = content_type.starts_with("text/")
        || content_type.contains("xml")
        || content_type.contains("urlencoded");
    if is_texty || content_type.is_empty() {
        if let Ok(text) = std::str::from_utf8(&raw) {
            return Value::Str(text.to_string());
        }
    }
    Value::Bytes(raw)
}
