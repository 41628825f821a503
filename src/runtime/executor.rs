//! Runtime executor - single-threaded cooperative graph walk
//!
//! The executor advances from the start node, building a fresh run context
//! per node (parameters never cross runs), executing the wrapped runner,
//! and selecting the next node from the action label. The only concurrency
//! is inside a batch wrapper. A failing node routes to a declared
//! `error`-action successor when one exists; otherwise the run aborts with
//! a structured error record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};

use crate::compiler::CompiledFlow;
use crate::error::{PflowError, Result};
use crate::llm::LlmClient;
use crate::mcp::McpRuntime;
use crate::node::{ExecServices, RunContext, ACTION_ERROR};
use crate::store::{SharedStore, Value, ValueMap};
use crate::template::{resolve_value, TemplateScope};
use crate::trace::{generate_run_id, redact_value, TraceCollector, TraceEvent};

use super::report::{ExecutionReport, NodeError, NodeState, NodeStatus};

/// System key carrying planner cache chunks for repair continuity
pub const PLANNER_CACHE_KEY: &str = "__planner_cache_chunks__";

/// Executes one compiled flow
pub struct Executor {
    flow: CompiledFlow,
    llm: Arc<dyn LlmClient>,
    mcp: Arc<McpRuntime>,
    verbose: bool,
}

impl Executor {
    pub fn new(flow: CompiledFlow) -> Self {
        Self {
            flow,
            llm: Arc::new(crate::llm::NotConfigured),
            mcp: Arc::new(McpRuntime::empty()),
            verbose: false,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_mcp(mut self, mcp: Arc<McpRuntime>) -> Self {
        self.mcp = mcp;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn flow(&self) -> &CompiledFlow {
        &self.flow
    }

    /// Run the flow to termination.
    ///
    /// `inputs` are the workflow's external parameters; declared defaults
    /// fill gaps, missing required inputs fail before any node runs.
    #[instrument(skip_all, fields(workflow = %self.flow.ir.display_name(), nodes = self.flow.nodes.len()))]
    pub async fn execute(
        &self,
        inputs: ValueMap,
        planner_cache: Option<serde_json::Value>,
        trace: TraceCollector,
    ) -> ExecutionReport {
        let run_id = generate_run_id();
        let started = Instant::now();
        info!(run_id = %run_id, "Starting workflow execution");

        trace.emit(TraceEvent::WorkflowStarted {
            name: self.flow.ir.display_name().to_string(),
            run_id: run_id.clone(),
            node_count: self.flow.nodes.len(),
            pflow_version: env!("CARGO_PKG_VERSION").to_string(),
        });

        let mut nodes: BTreeMap<String, NodeState> = self
            .flow
            .nodes
            .iter()
            .map(|n| (n.id.to_string(), NodeState::not_executed()))
            .collect();

        // Shared store lives for exactly this execution
        let store = match self.init_store(inputs, planner_cache) {
            Ok(store) => store,
            Err(error) => {
                let record = NodeError::from_error("<inputs>", &error);
                trace.emit(TraceEvent::WorkflowFailed {
                    error: error.to_string(),
                    failed_node: None,
                });
                return ExecutionReport {
                    success: false,
                    run_id,
                    duration_ms: started.elapsed().as_millis() as u64,
                    outputs: BTreeMap::new(),
                    error: Some(record),
                    nodes,
                    trace_path: None,
                };
            }
        };

        let services = ExecServices {
            trace: trace.clone(),
            llm: Arc::clone(&self.llm),
            mcp: Arc::clone(&self.mcp),
            verbose: self.verbose,
        };

        let mut current = self.flow.start;
        let mut failure: Option<NodeError> = None;

        loop {
            let node = &self.flow.nodes[current];
            let node_started = Instant::now();

            // Fresh context per entry: cloned services, empty params
            let mut ctx = RunContext::new(Arc::clone(&node.id), store.clone(), services.clone());
            let outcome = node.runner.run(&mut ctx).await;
            let duration_ms = node_started.elapsed().as_millis() as u64;

            match outcome {
                Ok(action) => {
                    nodes.insert(
                        node.id.to_string(),
                        NodeState {
                            status: NodeStatus::Completed,
                            duration_ms,
                            attempts: ctx.attempts.max(1),
                            cache_hit: false,
                            repaired: false,
                        },
                    );
                    match node.successors.get(&action) {
                        Some(next) => current = *next,
                        // No successor for this action: normal termination
                        None => break,
                    }
                }
                Err(error) => {
                    let record = NodeError::from_error(&node.id, &error);
                    nodes.insert(
                        node.id.to_string(),
                        NodeState {
                            status: NodeStatus::Failed,
                            duration_ms,
                            attempts: ctx.attempts.max(1),
                            cache_hit: false,
                            repaired: false,
                        },
                    );

                    // A declared error-action successor keeps the run alive;
                    // the error record lands in the node's namespace for
                    // downstream templates.
                    if let Some(next) = node.successors.get(ACTION_ERROR) {
                        store.set_namespaced(&node.id, "error", Value::Str(error.to_string()));
                        store.set_namespaced(
                            &node.id,
                            "error_category",
                            Value::Str(error.category().to_string()),
                        );
                        tracing::warn!(node = %node.id, %error, "routing to error successor");
                        current = *next;
                        continue;
                    }

                    trace.emit(TraceEvent::WorkflowFailed {
                        error: error.to_string(),
                        failed_node: Some(Arc::clone(&node.id)),
                    });
                    failure = Some(record);
                    break;
                }
            }
        }

        // Render declared outputs against the final store
        let mut outputs = BTreeMap::new();
        if failure.is_none() {
            match self.render_outputs(&store) {
                Ok(rendered) => outputs = rendered,
                Err(error) => {
                    trace.emit(TraceEvent::WorkflowFailed {
                        error: error.to_string(),
                        failed_node: None,
                    });
                    failure = Some(NodeError::from_error("<outputs>", &error));
                }
            }
        }

        let success = failure.is_none();
        let duration_ms = started.elapsed().as_millis() as u64;
        if success {
            trace.emit(TraceEvent::WorkflowCompleted {
                outputs: serde_json::to_value(&outputs).unwrap_or(serde_json::Value::Null),
                total_duration_ms: duration_ms,
            });
            info!(run_id = %run_id, duration_ms, "Workflow completed");
        }

        ExecutionReport {
            success,
            run_id,
            duration_ms,
            outputs,
            error: failure,
            nodes,
            trace_path: None,
        }
    }

    /// Build the store from declared inputs plus execution-provided params
    fn init_store(
        &self,
        mut provided: ValueMap,
        planner_cache: Option<serde_json::Value>,
    ) -> Result<SharedStore> {
        let store = SharedStore::new();

        for (name, spec) in &self.flow.ir.inputs {
            match provided.remove(name) {
                Some(value) => store.set(name, value),
                None => match &spec.default {
                    Some(default) => store.set(name, Value::from(default.clone())),
                    None if spec.is_required() => {
                        return Err(PflowError::IrReference {
                            detail: format!("missing required input '{name}'"),
                        })
                    }
                    None => {}
                },
            }
        }

        // Undeclared execution params pass through as context keys
        for (name, value) in provided {
            store.set(&name, value);
        }

        if let Some(chunks) = planner_cache {
            store.set(PLANNER_CACHE_KEY, Value::from(chunks));
        }

        Ok(store)
    }

    fn render_outputs(&self, store: &SharedStore) -> Result<BTreeMap<String, serde_json::Value>> {
        let scope = TemplateScope::new(store.clone());
        let mut outputs = BTreeMap::new();
        for (name, spec) in &self.flow.ir.outputs {
            // Output sources reference node namespaces (`${node.key}`); the
            // normal scope lookup covers them since namespaces are store
            // entries.
            let value = resolve_value(&spec.source, &scope)?;
            outputs.insert(name.clone(), redact_value(&value));
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::ir::WorkflowIr;
    use crate::registry::Registry;
    use serde_json::json;

    fn executor_for(raw: serde_json::Value) -> Executor {
        let ir = WorkflowIr::from_value(raw).unwrap();
        let flow = compile(ir, &Registry::unfiltered()).unwrap();
        Executor::new(flow)
    }

    #[tokio::test]
    async fn single_node_workflow_terminates() {
        let executor = executor_for(json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "only", "type": "echo", "params": {"value": "done"}}]
        }));

        let report = executor
            .execute(ValueMap::new(), None, TraceCollector::new())
            .await;
        assert!(report.success);
        assert_eq!(report.nodes["only"].status, NodeStatus::Completed);
    }

    #[tokio::test]
    async fn missing_required_input_fails_before_nodes() {
        let executor = executor_for(json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "e", "type": "echo", "params": {"value": "${url}"}}],
            "inputs": {"url": {"type": "string", "required": true}}
        }));

        let report = executor
            .execute(ValueMap::new(), None, TraceCollector::new())
            .await;
        assert!(!report.success);
        assert_eq!(report.nodes["e"].status, NodeStatus::NotExecuted);
        assert!(report.error.unwrap().message.contains("url"));
    }

    #[tokio::test]
    async fn input_default_applies() {
        let executor = executor_for(json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "e", "type": "echo", "params": {"value": "${greeting}"}}],
            "inputs": {"greeting": {"type": "string", "default": "hello"}},
            "outputs": {"out": {"source": "${e.value}"}}
        }));

        let report = executor
            .execute(ValueMap::new(), None, TraceCollector::new())
            .await;
        assert!(report.success);
        assert_eq!(report.outputs["out"], json!("hello"));
    }

    #[tokio::test]
    async fn failure_without_error_edge_aborts_run() {
        let executor = executor_for(json!({
            "ir_version": "0.1.0",
            "nodes": [
                {"id": "boom", "type": "shell", "params": {"command": "exit 7"}},
                {"id": "after", "type": "echo", "params": {"value": "unreachable"}}
            ],
            "edges": [{"from": "boom", "to": "after"}]
        }));

        let report = executor
            .execute(ValueMap::new(), None, TraceCollector::new())
            .await;
        assert!(!report.success);
        assert_eq!(report.nodes["boom"].status, NodeStatus::Failed);
        assert_eq!(report.nodes["after"].status, NodeStatus::NotExecuted);
        let error = report.error.unwrap();
        assert_eq!(error.node_id, "boom");
        assert_eq!(error.category, crate::error::ErrorCategory::Runtime);
    }

    #[tokio::test]
    async fn failure_routes_to_error_successor() {
        let executor = executor_for(json!({
            "ir_version": "0.1.0",
            "nodes": [
                {"id": "boom", "type": "shell", "params": {"command": "exit 1"}},
                {"id": "recover", "type": "echo", "params": {"value": "${boom.error}"}}
            ],
            "edges": [{"from": "boom", "to": "recover", "action": "error"}]
        }));

        let report = executor
            .execute(ValueMap::new(), None, TraceCollector::new())
            .await;
        assert!(report.success);
        assert_eq!(report.nodes["boom"].status, NodeStatus::Failed);
        assert_eq!(report.nodes["recover"].status, NodeStatus::Completed);
    }

    #[tokio::test]
    async fn planner_cache_lands_under_system_key() {
        let executor = executor_for(json!({
            "ir_version": "0.1.0",
            "nodes": [{"id": "e", "type": "echo", "params": {"value": 1}}]
        }));

        // The system key is invisible to templates, so the only observable
        // effect is that execution still succeeds; store injection is
        // covered by the store tests.
        let report = executor
            .execute(
                ValueMap::new(),
                Some(json!([{"chunk": 1}])),
                TraceCollector::new(),
            )
            .await;
        assert!(report.success);
    }

    #[tokio::test]
    async fn outputs_render_from_namespaces() {
        let executor = executor_for(json!({
            "ir_version": "0.1.0",
            "nodes": [
                {"id": "first", "type": "echo", "params": {"value": 41}},
                {"id": "second", "type": "echo", "params": {"value": "${first.value}"}}
            ],
            "edges": [{"from": "first", "to": "second"}],
            "outputs": {
                "answer": {"source": "${second.value}"},
                "labeled": {"source": "value=${first.value}"}
            }
        }));

        let report = executor
            .execute(ValueMap::new(), None, TraceCollector::new())
            .await;
        assert!(report.success);
        assert_eq!(report.outputs["answer"], json!(41));
        assert_eq!(report.outputs["labeled"], json!("value=41"));
    }

    #[tokio::test]
    async fn trace_records_every_path_node_once() {
        let executor = executor_for(json!({
            "ir_version": "0.1.0",
            "nodes": [
                {"id": "a", "type": "echo", "params": {"value": 1}},
                {"id": "b", "type": "echo", "params": {"value": 2}},
                {"id": "off-path", "type": "echo", "params": {"value": 3}}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }));

        let trace = TraceCollector::new();
        let report = executor.execute(ValueMap::new(), None, trace.clone()).await;

        assert!(report.success);
        for id in ["a", "b"] {
            let completed = trace
                .filter_node(id)
                .iter()
                .filter(|e| matches!(e.kind, TraceEvent::NodeCompleted { .. }))
                .count();
            assert_eq!(completed, 1, "node {id} should complete exactly once");
        }
        assert_eq!(report.nodes["off-path"].status, NodeStatus::NotExecuted);
        assert!(trace.filter_node("off-path").is_empty());
    }
}
