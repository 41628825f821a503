//! End-to-end executor scenarios: sequential HTTP → LLM → file, parallel
//! batch fan-out, validation-only passes, binary round-trips, and retries.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pflow::llm::ScriptedClient;
use pflow::registry::Registry;
use pflow::runtime::{Executor, NodeStatus};
use pflow::store::{Value, ValueMap};
use pflow::trace::{TraceCollector, TraceEvent};
use pflow::{compile, validate_workflow, WorkflowIr};

fn executor_for(raw: serde_json::Value) -> Executor {
    let ir = WorkflowIr::from_value(raw).unwrap();
    let flow = compile(ir, &Registry::unfiltered()).unwrap();
    Executor::new(flow)
}

fn inputs_of(raw: serde_json::Value) -> ValueMap {
    match Value::from(raw) {
        Value::Map(m) => m,
        _ => panic!("inputs must be a map"),
    }
}

// ═══════════════════════════════════════════════════════════════
// SCENARIO: sequential HTTP fetch + LLM summarize + file write
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn sequential_fetch_summarize_save() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"title": "quarterly report"}"#, "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let out_dir = TempDir::new().unwrap();
    let out_path = out_dir.path().join("summary.txt");

    let executor = executor_for(json!({
        "ir_version": "0.1.0",
        "name": "fetch-summarize-save",
        "nodes": [
            {"id": "fetch", "type": "http", "params": {"method": "GET", "url": "${url}"}},
            {"id": "summarize", "type": "llm", "params": {"prompt": "Summarize: ${fetch.response}"}},
            {"id": "save", "type": "write-file", "params": {
                "path": "${out_path}",
                "content": "${summarize.response}"
            }}
        ],
        "edges": [
            {"from": "fetch", "to": "summarize"},
            {"from": "summarize", "to": "save"}
        ],
        "inputs": {
            "url": {"type": "string", "required": true},
            "out_path": {"type": "string", "required": true}
        },
        "outputs": {
            "summary": {"source": "${summarize.response}"},
            "status": {"source": "${fetch.status_code}"}
        }
    }))
    .with_llm(Arc::new(ScriptedClient::new(["a concise summary"])));

    let trace = TraceCollector::new();
    let report = executor
        .execute(
            inputs_of(json!({
                "url": format!("{}/data.json", server.uri()),
                "out_path": out_path.to_str().unwrap()
            })),
            None,
            trace.clone(),
        )
        .await;

    assert!(report.success, "run failed: {:?}", report.error);

    // All three nodes completed exactly once on the path
    for id in ["fetch", "summarize", "save"] {
        assert_eq!(report.nodes[id].status, NodeStatus::Completed);
        let completed = trace
            .filter_node(id)
            .iter()
            .filter(|e| matches!(e.kind, TraceEvent::NodeCompleted { .. }))
            .count();
        assert_eq!(completed, 1, "{id} should complete once");
    }

    // Status code landed in the fetch namespace
    assert_eq!(report.outputs["status"], json!(200));

    // File content equals the LLM response
    assert_eq!(
        std::fs::read_to_string(&out_path).unwrap(),
        "a concise summary"
    );
    assert_eq!(report.outputs["summary"], json!("a concise summary"));

    // The LLM call was intercepted into the trace with its prompt
    let llm_calls: Vec<_> = trace
        .filter_node("summarize")
        .into_iter()
        .filter(|e| matches!(e.kind, TraceEvent::LlmCall { .. }))
        .collect();
    assert_eq!(llm_calls.len(), 1);
    match &llm_calls[0].kind {
        TraceEvent::LlmCall { prompt, .. } => {
            assert!(prompt.starts_with("Summarize: "));
            assert!(prompt.contains("quarterly report"));
        }
        _ => unreachable!(),
    }
}

// ═══════════════════════════════════════════════════════════════
// SCENARIO: parallel batch over a list
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn parallel_batch_over_names() {
    let executor = executor_for(json!({
        "ir_version": "0.1.0",
        "nodes": [{
            "id": "greet",
            "type": "shell",
            "params": {
                "command": "echo \"hello ${name}\"",
                "batch": {
                    "items": "${names}",
                    "as": "name",
                    "parallel": true,
                    "max_concurrent": 5
                }
            }
        }],
        "inputs": {"names": {"type": "list", "required": true}},
        "outputs": {"results": {"source": "${greet.results}"}}
    }));

    let report = executor
        .execute(
            inputs_of(json!({"names": ["a", "b", "c"]})),
            None,
            TraceCollector::new(),
        )
        .await;

    assert!(report.success, "run failed: {:?}", report.error);
    let results = report.outputs["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    // Result order matches input order regardless of completion order
    for (i, expected) in ["hello a", "hello b", "hello c"].iter().enumerate() {
        let stdout = results[i]["stdout"].as_str().unwrap();
        assert!(
            stdout.contains(expected),
            "results[{i}].stdout = {stdout:?}, expected {expected:?}"
        );
    }
}

#[tokio::test]
async fn batch_with_empty_items_completes_with_empty_results() {
    let executor = executor_for(json!({
        "ir_version": "0.1.0",
        "nodes": [{
            "id": "greet",
            "type": "shell",
            "params": {
                "command": "echo hi ${name}",
                "batch": {"items": "${names}", "as": "name"}
            }
        }],
        "inputs": {"names": {"type": "list"}},
        "outputs": {"results": {"source": "${greet.results}"}}
    }));

    let report = executor
        .execute(inputs_of(json!({"names": []})), None, TraceCollector::new())
        .await;

    assert!(report.success);
    assert_eq!(report.outputs["results"], json!([]));
    assert_eq!(report.nodes["greet"].status, NodeStatus::Completed);
}

// ═══════════════════════════════════════════════════════════════
// SCENARIO: validation-only with an unresolved reference
// ═══════════════════════════════════════════════════════════════

#[test]
fn validation_only_reports_unresolved_variable() {
    let ir = WorkflowIr::from_value(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "clone", "type": "shell", "params": {"command": "git clone ${repoo}"}}
        ],
        "inputs": {"repo": {"type": "string", "required": true}}
    }));

    // Reference validation runs at load time, so the unresolved variable
    // surfaces before anything could execute.
    let err = ir.unwrap_err();
    match err {
        pflow::PflowError::TemplateUnresolved {
            variable,
            available_variables,
            ..
        } => {
            assert_eq!(variable, "repoo");
            assert!(available_variables.contains(&"repo".to_string()));
        }
        other => panic!("expected TemplateUnresolved, got {other:?}"),
    }
}

#[test]
fn validate_workflow_passes_clean_ir() {
    let ir = WorkflowIr::from_value(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "clone", "type": "shell", "params": {"command": "git clone ${repo}"}}
        ],
        "inputs": {"repo": {"type": "string", "required": true}}
    }))
    .unwrap();
    assert!(validate_workflow(ir, &Registry::unfiltered()).is_ok());
}

// ═══════════════════════════════════════════════════════════════
// SCENARIO: binary download → file write, byte-identical
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn binary_download_roundtrips_byte_identical() {
    let payload: Vec<u8> = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0xff, 0x7f];

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/image.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(payload.clone(), "image/png"))
        .mount(&server)
        .await;

    let out_dir = TempDir::new().unwrap();
    let out_path = out_dir.path().join("copy.png");

    let executor = executor_for(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "download", "type": "http", "params": {"url": "${url}"}},
            {"id": "save", "type": "write-file", "params": {
                "path": "${out_path}",
                "content": "${download.response}"
            }}
        ],
        "edges": [{"from": "download", "to": "save"}],
        "inputs": {
            "url": {"type": "string", "required": true},
            "out_path": {"type": "string", "required": true}
        }
    }));

    let report = executor
        .execute(
            inputs_of(json!({
                "url": format!("{}/image.png", server.uri()),
                "out_path": out_path.to_str().unwrap()
            })),
            None,
            TraceCollector::new(),
        )
        .await;

    assert!(report.success, "run failed: {:?}", report.error);
    // The single-reference template carried bytes through untouched
    assert_eq!(std::fs::read(&out_path).unwrap(), payload);
}

#[tokio::test]
async fn binary_in_string_template_fails_explicitly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0xff, 0xfe], "image/png"))
        .mount(&server)
        .await;

    let executor = executor_for(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "download", "type": "http", "params": {"url": "${url}"}},
            {"id": "embed", "type": "echo", "params": {"value": "data: ${download.response}"}}
        ],
        "edges": [{"from": "download", "to": "embed"}],
        "inputs": {"url": {"type": "string", "required": true}}
    }));

    let report = executor
        .execute(
            inputs_of(json!({"url": format!("{}/blob", server.uri())})),
            None,
            TraceCollector::new(),
        )
        .await;

    assert!(!report.success);
    let error = report.error.unwrap();
    assert_eq!(error.code, "PFLOW-031");
    assert_eq!(error.node_id, "embed");
}

// ═══════════════════════════════════════════════════════════════
// SCENARIO: retry with transient failures
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn transient_failure_recovers_within_max_attempts() {
    let executor = executor_for(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "fetch", "type": "fail-n-times", "params": {
                "fail_times": 2, "max_attempts": 3, "wait_seconds": 0
            }},
            {"id": "summarize", "type": "echo", "params": {"value": "${fetch.result}"}}
        ],
        "edges": [{"from": "fetch", "to": "summarize"}]
    }));

    let trace = TraceCollector::new();
    let report = executor
        .execute(ValueMap::new(), None, trace.clone())
        .await;

    assert!(report.success, "run failed: {:?}", report.error);
    assert_eq!(report.nodes["fetch"].status, NodeStatus::Completed);
    assert_eq!(report.nodes["fetch"].attempts, 3);
    assert_eq!(report.nodes["summarize"].status, NodeStatus::Completed);

    let retries = trace
        .filter_node("fetch")
        .iter()
        .filter(|e| matches!(e.kind, TraceEvent::NodeRetried { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn exhausted_retries_fail_the_run() {
    let executor = executor_for(json!({
        "ir_version": "0.1.0",
        "nodes": [
            {"id": "fetch", "type": "fail-n-times", "params": {
                "fail_times": 5, "max_attempts": 3, "wait_seconds": 0
            }},
            {"id": "summarize", "type": "echo", "params": {"value": "never"}}
        ],
        "edges": [{"from": "fetch", "to": "summarize"}]
    }));

    let report = executor
        .execute(ValueMap::new(), None, TraceCollector::new())
        .await;

    assert!(!report.success);
    assert_eq!(report.nodes["fetch"].status, NodeStatus::Failed);
    assert_eq!(report.nodes["fetch"].attempts, 3);
    assert_eq!(report.nodes["summarize"].status, NodeStatus::NotExecuted);
    assert_eq!(report.error.unwrap().node_id, "fetch");
}

// ═══════════════════════════════════════════════════════════════
// HTTP failure enrichment
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn http_failure_attaches_raw_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let executor = executor_for(json!({
        "ir_version": "0.1.0",
        "nodes": [{"id": "fetch", "type": "http", "params": {"url": "${url}"}}],
        "inputs": {"url": {"type": "string", "required": true}}
    }));

    let report = executor
        .execute(
            inputs_of(json!({"url": format!("{}/broken", server.uri())})),
            None,
            TraceCollector::new(),
        )
        .await;

    assert!(!report.success);
    let error = report.error.unwrap();
    assert_eq!(error.status_code, Some(503));
    assert_eq!(error.raw_response.as_deref(), Some("upstream down"));
    assert_eq!(error.category, pflow::ErrorCategory::Network);
}
