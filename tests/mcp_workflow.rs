//! MCP workflow integration: virtual node types compiled and executed
//! against a mock runtime, with the single-attempt contract observed.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;
use serde_json::json;

use pflow::mcp::McpRuntime;
use pflow::registry::Registry;
use pflow::runtime::{Executor, NodeStatus};
use pflow::store::{Value, ValueMap};
use pflow::trace::{TraceCollector, TraceEvent};
use pflow::{compile, WorkflowIr};

fn mock_runtime(results: &[(&str, serde_json::Value)]) -> Arc<McpRuntime> {
    let mut map = FxHashMap::default();
    for (key, value) in results {
        map.insert(key.to_string(), value.clone());
    }
    Arc::new(McpRuntime::with_mock(map))
}

fn executor_for(raw: serde_json::Value, mcp: Arc<McpRuntime>) -> Executor {
    let ir = WorkflowIr::from_value(raw).unwrap();
    let flow = compile(ir, &Registry::unfiltered()).unwrap();
    Executor::new(flow).with_mcp(mcp)
}

#[tokio::test]
async fn filesystem_read_lands_text_result() {
    let mcp = mock_runtime(&[(
        "filesystem/read_text_file",
        json!({"content": [{"type": "text", "text": "file body here"}]}),
    )]);

    let executor = executor_for(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "read",
                "type": "mcp-filesystem-read_text_file",
                "params": {"path": "/tmp/x.txt"}
            }],
            "outputs": {"content": {"source": "${read.result}"}}
        }),
        mcp,
    );

    let trace = TraceCollector::new();
    let report = executor.execute(ValueMap::new(), None, trace.clone()).await;

    assert!(report.success, "run failed: {:?}", report.error);
    assert_eq!(report.outputs["content"], json!("file body here"));
    // One attempt, exactly one MCP call
    assert_eq!(report.nodes["read"].attempts, 1);
    let calls = trace
        .filter_node("read")
        .iter()
        .filter(|e| matches!(e.kind, TraceEvent::McpCall { .. }))
        .count();
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn mcp_retry_declared_in_ir_is_still_single_attempt() {
    let mcp = mock_runtime(&[(
        "filesystem/read_text_file",
        json!({
            "content": [{"type": "text", "text": "nope"}],
            "isError": true
        }),
    )]);

    let executor = executor_for(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "read",
                "type": "mcp-filesystem-read_text_file",
                "params": {"path": "/tmp/x.txt", "max_attempts": 4, "wait_seconds": 1}
            }]
        }),
        mcp,
    );

    let trace = TraceCollector::new();
    let report = executor.execute(ValueMap::new(), None, trace.clone()).await;

    assert!(!report.success);
    // The clamp means no retries ran and only one call was made
    assert_eq!(report.nodes["read"].attempts, 1);
    let calls = trace
        .filter_node("read")
        .iter()
        .filter(|e| matches!(e.kind, TraceEvent::McpCall { .. }))
        .count();
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn tool_error_categorizes_as_tool() {
    let mcp = mock_runtime(&[(
        "filesystem/read_text_file",
        json!({
            "content": [{"type": "text", "text": "path /tmp resolves outside allowed root"}],
            "isError": true
        }),
    )]);

    let executor = executor_for(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "read",
                "type": "mcp-filesystem-read_text_file",
                "params": {"path": "/tmp/x.txt"}
            }]
        }),
        mcp,
    );

    let report = executor
        .execute(ValueMap::new(), None, TraceCollector::new())
        .await;

    assert!(!report.success);
    let error = report.error.unwrap();
    assert_eq!(error.category, pflow::ErrorCategory::Tool);
    assert!(error.message.contains("allowed root"));
}

#[tokio::test]
async fn structured_content_unpacks_into_namespace() {
    let mcp = mock_runtime(&[(
        "weather/current",
        json!({
            "content": [{"type": "text", "text": "see structured"}],
            "structuredContent": {"temp_c": 21, "summary": "sunny"}
        }),
    )]);

    let executor = executor_for(
        json!({
            "ir_version": "0.1.0",
            "nodes": [
                {"id": "weather", "type": "mcp-weather-current", "params": {"city": "Paris"}},
                {"id": "report", "type": "echo", "params": {"value": "It is ${weather.summary}, ${weather.temp_c}C"}}
            ],
            "edges": [{"from": "weather", "to": "report"}],
            "outputs": {"line": {"source": "${report.value}"}}
        }),
        mcp,
    );

    let report = executor
        .execute(ValueMap::new(), None, TraceCollector::new())
        .await;

    assert!(report.success, "run failed: {:?}", report.error);
    assert_eq!(report.outputs["line"], json!("It is sunny, 21C"));
}

#[tokio::test]
async fn template_types_reach_tool_arguments_natively() {
    // The mock echoes nothing; the assertion is that numeric/boolean params
    // survive template resolution without stringification and the call
    // succeeds (binary would fail the strict JSON conversion).
    let mcp = mock_runtime(&[("github/search", json!({"content": [{"type": "text", "text": "[]"}]}))]);

    let executor = executor_for(
        json!({
            "ir_version": "0.1.0",
            "nodes": [{
                "id": "search",
                "type": "mcp-github-search",
                "params": {"query": "${q}", "limit": "${limit}", "archived": false}
            }],
            "inputs": {
                "q": {"type": "string", "required": true},
                "limit": {"type": "int", "required": true}
            }
        }),
        mcp,
    );

    let mut inputs = ValueMap::new();
    inputs.insert("q".to_string(), Value::Str("pflow".to_string()));
    inputs.insert("limit".to_string(), Value::Int(10));

    let report = executor
        .execute(inputs, None, TraceCollector::new())
        .await;
    assert!(report.success, "run failed: {:?}", report.error);
    assert_eq!(report.nodes["search"].status, NodeStatus::Completed);
}
