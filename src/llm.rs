//! LLM client interface - consumed by the `llm` node, provided externally
//!
//! The client library itself is an external collaborator; the core defines
//! the interface it consumes plus the interceptor that records calls into
//! the trace. The interceptor is explicit and scoped (installed by the
//! instrumented wrapper for the duration of a node run) - there is no
//! global patching.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PflowError, Result};
use crate::trace::{TraceCollector, TraceEvent};

/// One LLM completion request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub model: Option<String>,
}

/// Token usage for cost accounting
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One LLM completion response
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// The interface the core consumes from an LLM client library
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Default client when no provider is wired in: every call fails with an
/// auth-category error naming the node that needed it.
pub struct NotConfigured;

#[async_trait]
impl LlmClient for NotConfigured {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Err(PflowError::NodeAuth {
            node_id: "llm".to_string(),
            reason: "no LLM client configured".to_string(),
        })
    }
}

/// Scripted client for tests and dry runs: returns canned responses in
/// order, then repeats the last one.
pub struct ScriptedClient {
    responses: Vec<String>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl ScriptedClient {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let idx = self
            .cursor
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let text = self
            .responses
            .get(idx)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default();
        Ok(LlmResponse {
            text,
            model: request.model.unwrap_or_else(|| "scripted".to_string()),
            usage: TokenUsage {
                input_tokens: request.prompt.len() as u32 / 4,
                output_tokens: 16,
            },
        })
    }
}

/// Trace-recording wrapper around a client, scoped to one node run.
///
/// Installed by the instrumented wrapper on entry and dropped on exit - the
/// guaranteed-release equivalent of the scoped interceptor.
pub struct InterceptedClient {
    inner: Arc<dyn LlmClient>,
    trace: TraceCollector,
    node_id: Arc<str>,
}

impl InterceptedClient {
    pub fn new(inner: Arc<dyn LlmClient>, trace: TraceCollector, node_id: Arc<str>) -> Self {
        Self {
            inner,
            trace,
            node_id,
        }
    }
}

#[async_trait]
impl LlmClient for InterceptedClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let prompt = request.prompt.clone();
        let result = self.inner.complete(request).await;
        match &result {
            Ok(response) => {
                self.trace.emit(TraceEvent::LlmCall {
                    node_id: Arc::clone(&self.node_id),
                    prompt,
                    response: response.text.clone(),
                    model: response.model.clone(),
                    usage: response.usage.clone(),
                });
            }
            Err(e) => {
                self.trace.emit(TraceEvent::LlmCall {
                    node_id: Arc::clone(&self.node_id),
                    prompt,
                    response: format!("<error: {e}>"),
                    model: String::new(),
                    usage: TokenUsage::default(),
                });
            }
        }
        result
    }
}
