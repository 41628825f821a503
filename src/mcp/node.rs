//! Universal MCP node - one behavior for every virtual tool type
//!
//! Behavior is entirely parameterized by the `__mcp_server__` and
//! `__mcp_tool__` params the compiler injects. Retry is pinned to a single
//! attempt: each attempt spawns a fresh server subprocess, and retrying
//! would multiply live processes.
//!
//! Result extraction priority: `structuredContent` (typed fields unpacked
//! into the namespace plus a `result` alias) → `isError` (tool-level
//! error) → concatenated text blocks as `result`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::{PflowError, Result};
use crate::node::{NodeBehavior, RetryPolicy, RunContext, ACTION_DEFAULT};
use crate::store::{Value, ValueMap};
use crate::trace::{redact_json, TraceEvent};

/// Injected param naming the server (compiler-owned)
pub const PARAM_SERVER: &str = "__mcp_server__";

/// Injected param naming the tool (compiler-owned)
pub const PARAM_TOOL: &str = "__mcp_tool__";

#[derive(Default)]
pub struct McpToolNode;

impl McpToolNode {
    fn identity(ctx: &RunContext) -> Result<(String, String)> {
        let server = ctx.param_str(PARAM_SERVER)?.to_string();
        let tool = ctx.param_str(PARAM_TOOL)?.to_string();
        Ok((server, tool))
    }
}

#[async_trait]
impl NodeBehavior for McpToolNode {
    /// Validate the server still exists and assemble tool arguments from
    /// the resolved params (everything except injected `__` keys).
    /// Resolution has already happened type-preservingly, so numeric and
    /// boolean arguments reach the tool as numbers and booleans.
    async fn prep(&self, ctx: &RunContext) -> Result<Value> {
        let (server, _tool) = Self::identity(ctx)?;
        if !ctx.services.mcp.has_server(&server) {
            return Err(PflowError::McpNotConfigured { name: server });
        }

        let mut arguments = ValueMap::new();
        for (key, value) in &ctx.params {
            if key.starts_with("__") || key == "batch" {
                continue;
            }
            arguments.insert(key.clone(), value.clone());
        }
        Ok(Value::Map(arguments))
    }

    async fn exec(&self, ctx: &RunContext, prep: Value) -> Result<Value> {
        let (server, tool) = Self::identity(ctx)?;
        let arguments = prep.to_json_strict().ok_or_else(|| {
            PflowError::TemplateTypeMismatch {
                template: format!("{server}/{tool} arguments"),
                detail: "binary values cannot be sent as MCP tool arguments".to_string(),
            }
        })?;

        let start = Instant::now();
        let result = ctx
            .services
            .mcp
            .call_tool(&server, &tool, arguments.clone())
            .await;

        let is_error = match &result {
            Ok(outcome) => outcome.is_error,
            Err(_) => true,
        };
        ctx.services.trace.emit(TraceEvent::McpCall {
            node_id: Arc::clone(&ctx.node_id),
            server: server.clone(),
            tool: tool.clone(),
            arguments: redact_json(&arguments),
            duration_ms: start.elapsed().as_millis() as u64,
            is_error,
        });

        let outcome = result?;
        // Priority chain: structured content wins even when isError is also
        // set - only a structured-less error raises.
        if outcome.structured.is_none() && outcome.is_error {
            return Err(PflowError::ToolError {
                server,
                tool,
                message: outcome.text,
                data: None,
            });
        }

        let mut exec = ValueMap::new();
        if let Some(structured) = outcome.structured {
            exec.insert("structured".to_string(), Value::from(structured));
        }
        exec.insert("text".to_string(), Value::Str(outcome.text));
        Ok(Value::Map(exec))
    }

    async fn post(&self, ctx: &RunContext, _prep: Value, exec: Value) -> Result<String> {
        let exec = match exec {
            Value::Map(m) => m,
            other => {
                return Err(PflowError::internal(format!(
                    "MCP exec produced {}",
                    other.type_name()
                )))
            }
        };

        match exec.get("structured") {
            Some(Value::Map(fields)) => {
                for (key, value) in fields {
                    ctx.store.set(key, value.clone());
                }
                ctx.store
                    .set("result", Value::Map(fields.clone()));
            }
            Some(structured) => ctx.store.set("result", structured.clone()),
            None => {
                let text = exec
                    .get("text")
                    .cloned()
                    .unwrap_or(Value::Str(String::new()));
                ctx.store.set("result", text);
            }
        }
        Ok(ACTION_DEFAULT.to_string())
    }

    /// One attempt per execution, always
    fn default_retry(&self) -> RetryPolicy {
        RetryPolicy::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpRuntime;
    use crate::node::ExecServices;
    use crate::store::SharedStore;
    use rustc_hash::FxHashMap;
    use serde_json::json;

    fn mcp_ctx(
        node_id: &str,
        shared: &SharedStore,
        results: FxHashMap<String, serde_json::Value>,
        params: serde_json::Value,
    ) -> RunContext {
        let mut services = ExecServices::for_tests();
        services.mcp = Arc::new(McpRuntime::with_mock(results));
        let mut ctx = RunContext::new(Arc::from(node_id), shared.clone(), services);
        if let Value::Map(m) = Value::from(params) {
            ctx.params = m;
        }
        ctx
    }

    fn mock_result(key: &str, result: serde_json::Value) -> FxHashMap<String, serde_json::Value> {
        let mut map = FxHashMap::default();
        map.insert(key.to_string(), result);
        map
    }

    async fn run_node(ctx: &RunContext) -> Result<String> {
        let node = McpToolNode;
        let prep = node.prep(ctx).await?;
        let exec = node.exec(ctx, prep.clone()).await?;
        node.post(ctx, prep, exec).await
    }

    #[tokio::test]
    async fn text_result_lands_under_result() {
        let shared = SharedStore::new();
        let ctx = mcp_ctx(
            "read",
            &shared,
            mock_result(
                "filesystem/read_text_file",
                json!({"content": [{"type": "text", "text": "file text"}]}),
            ),
            json!({
                "__mcp_server__": "filesystem",
                "__mcp_tool__": "read_text_file",
                "path": "/tmp/x.txt"
            }),
        );

        run_node(&ctx).await.unwrap();
        assert_eq!(
            shared.namespace("read").unwrap()["result"],
            Value::Str("file text".into())
        );
    }

    #[tokio::test]
    async fn structured_content_unpacks_fields() {
        let shared = SharedStore::new();
        let ctx = mcp_ctx(
            "stat",
            &shared,
            mock_result(
                "filesystem/stat",
                json!({
                    "content": [],
                    "structuredContent": {"size": 42, "is_dir": false}
                }),
            ),
            json!({
                "__mcp_server__": "filesystem",
                "__mcp_tool__": "stat",
                "path": "/tmp"
            }),
        );

        run_node(&ctx).await.unwrap();
        let ns = shared.namespace("stat").unwrap();
        assert_eq!(ns["size"], Value::Int(42));
        assert_eq!(ns["is_dir"], Value::Bool(false));
        assert!(matches!(ns["result"], Value::Map(_)));
    }

    #[tokio::test]
    async fn structured_content_wins_over_is_error() {
        let shared = SharedStore::new();
        let ctx = mcp_ctx(
            "stat",
            &shared,
            mock_result(
                "filesystem/stat",
                json!({
                    "content": [{"type": "text", "text": "partial failure"}],
                    "structuredContent": {"size": 7, "warnings": ["slow disk"]},
                    "isError": true
                }),
            ),
            json!({
                "__mcp_server__": "filesystem",
                "__mcp_tool__": "stat",
                "path": "/tmp"
            }),
        );

        run_node(&ctx).await.unwrap();
        let ns = shared.namespace("stat").unwrap();
        assert_eq!(ns["size"], Value::Int(7));
        assert!(matches!(ns["result"], Value::Map(_)));
    }

    #[tokio::test]
    async fn is_error_raises_tool_error() {
        let shared = SharedStore::new();
        let ctx = mcp_ctx(
            "read",
            &shared,
            mock_result(
                "filesystem/read_text_file",
                json!({
                    "content": [{"type": "text", "text": "access denied"}],
                    "isError": true
                }),
            ),
            json!({
                "__mcp_server__": "filesystem",
                "__mcp_tool__": "read_text_file",
                "path": "/private/tmp"
            }),
        );

        let err = run_node(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "PFLOW-063");
        assert_eq!(err.category(), crate::error::ErrorCategory::Tool);
    }

    #[tokio::test]
    async fn unknown_server_fails_in_prep() {
        let shared = SharedStore::new();
        let ctx = mcp_ctx(
            "read",
            &shared,
            FxHashMap::default(),
            json!({"__mcp_server__": "ghost", "__mcp_tool__": "x"}),
        );
        let err = McpToolNode.prep(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "PFLOW-061");
    }

    #[tokio::test]
    async fn arguments_exclude_injected_keys_and_preserve_types() {
        let shared = SharedStore::new();
        let ctx = mcp_ctx(
            "search",
            &shared,
            mock_result("github/search", json!({"content": []})),
            json!({
                "__mcp_server__": "github",
                "__mcp_tool__": "search",
                "query": "pflow",
                "limit": 10,
                "archived": false
            }),
        );

        let prep = McpToolNode.prep(&ctx).await.unwrap();
        let args = prep.as_map().unwrap();
        assert!(!args.contains_key(PARAM_SERVER));
        assert_eq!(args["limit"], Value::Int(10));
        assert_eq!(args["archived"], Value::Bool(false));
    }

    #[tokio::test]
    async fn mcp_call_recorded_in_trace() {
        let shared = SharedStore::new();
        let ctx = mcp_ctx(
            "read",
            &shared,
            mock_result(
                "filesystem/read_text_file",
                json!({"content": [{"type": "text", "text": "x"}]}),
            ),
            json!({
                "__mcp_server__": "filesystem",
                "__mcp_tool__": "read_text_file",
                "path": "/tmp/x.txt",
                "api_key": "sk-secret"
            }),
        );

        run_node(&ctx).await.unwrap();
        let events = ctx.services.trace.filter_node("read");
        match &events[0].kind {
            TraceEvent::McpCall {
                server,
                tool,
                arguments,
                is_error,
                ..
            } => {
                assert_eq!(server, "filesystem");
                assert_eq!(tool, "read_text_file");
                assert!(!is_error);
                assert_eq!(arguments["api_key"], json!("<REDACTED>"));
                assert_eq!(arguments["path"], json!("/tmp/x.txt"));
            }
            other => panic!("expected McpCall, got {other:?}"),
        }
    }
}
