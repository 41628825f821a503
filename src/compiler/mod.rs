//! Compiler - lowers validated IR into an executable graph
//!
//! Each IR node becomes a wrapped runner plus a successor map keyed by
//! action label. The graph is a table of indices, not pointers: a node may
//! be the successor of many predecessors, and per-run isolation never needs
//! to deep-copy successor chains.
//!
//! Virtual MCP types (`mcp-{server}-{tool}`) compile to the universal MCP
//! behavior with `__mcp_server__` / `__mcp_tool__` injected into the params.
//! No code generation anywhere.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::error::{PflowError, Result};
use crate::ir::{WorkflowIr, DEFAULT_ACTION};
use crate::mcp::node::{McpToolNode, PARAM_SERVER, PARAM_TOOL};
use crate::mcp::parse_virtual_type_id;
use crate::node::wrappers::{wrap_node, NodeRunner};
use crate::node::{BatchConfig, NodeBehavior, RetryPolicy, ACTION_ERROR};
use crate::registry::Registry;
use crate::store::{Value, ValueMap};

/// One compiled, wrapped node
pub struct CompiledNode {
    pub id: Arc<str>,
    pub type_id: String,
    pub runner: Arc<dyn NodeRunner>,
    /// Outgoing edges: action label → node table index
    pub successors: FxHashMap<String, usize>,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for CompiledNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledNode")
            .field("id", &self.id)
            .field("type_id", &self.type_id)
            .field("successors", &self.successors)
            .field("retry", &self.retry)
            .finish()
    }
}

/// The executable graph with its designated start node
pub struct CompiledFlow {
    pub nodes: Vec<CompiledNode>,
    pub start: usize,
    pub index: FxHashMap<Arc<str>, usize>,
    /// Kept for input defaults and output rendering at execution time
    pub ir: WorkflowIr,
}

impl std::fmt::Debug for CompiledFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFlow")
            .field("nodes", &self.nodes)
            .field("start", &self.start)
            .field("index", &self.index)
            .field("ir", &self.ir)
            .finish()
    }
}

impl CompiledFlow {
    pub fn node_by_id(&self, id: &str) -> Option<&CompiledNode> {
        self.index.get(id).map(|i| &self.nodes[*i])
    }

    pub fn start_node(&self) -> &CompiledNode {
        &self.nodes[self.start]
    }
}

/// Compile validated IR against the registry
pub fn compile(ir: WorkflowIr, registry: &Registry) -> Result<CompiledFlow> {
    let mut nodes = Vec::with_capacity(ir.nodes.len());
    let mut index: FxHashMap<Arc<str>, usize> = FxHashMap::default();

    for (i, def) in ir.nodes.iter().enumerate() {
        let id: Arc<str> = Arc::from(def.id.as_str());
        let mut params = def.params.clone();

        // Node-config params are consumed here, not passed to behaviors
        let declared_retry = extract_retry(&mut params);
        let batch = BatchConfig::from_params(&def.id, &params)?;
        params.remove("batch");

        let (behavior, retry): (Arc<dyn NodeBehavior>, RetryPolicy) =
            if def.type_id.starts_with("mcp-") {
                let (server, tool) =
                    parse_virtual_type_id(&def.type_id).ok_or_else(|| PflowError::CompileError {
                        reason: format!(
                            "node '{}': malformed virtual type '{}'",
                            def.id, def.type_id
                        ),
                    })?;
                params.insert(
                    PARAM_SERVER.to_string(),
                    serde_json::Value::String(server.to_string()),
                );
                params.insert(
                    PARAM_TOOL.to_string(),
                    serde_json::Value::String(tool.to_string()),
                );
                if declared_retry.is_some() {
                    tracing::warn!(
                        node = %def.id,
                        "MCP nodes always run a single attempt; declared retry ignored"
                    );
                }
                // Each attempt would spawn a new subprocess
                (Arc::new(McpToolNode), RetryPolicy::none())
            } else {
                let entry = registry.get(&def.type_id).ok_or_else(|| {
                    PflowError::RegistryMiss {
                        type_id: def.type_id.clone(),
                        suggestions: registry.suggest(&def.type_id),
                    }
                })?;
                warn_unknown_params(&def.id, &params, entry);
                let factory =
                    registry
                        .factory(&def.type_id)
                        .ok_or_else(|| PflowError::RegistryMiss {
                            type_id: def.type_id.clone(),
                            suggestions: registry.suggest(&def.type_id),
                        })?;
                let behavior = factory();
                let retry = declared_retry.unwrap_or_else(|| behavior.default_retry());
                (behavior, retry)
            };

        let raw_params = to_value_map(params);
        let runner = wrap_node(behavior, raw_params, retry, batch);

        index.insert(Arc::clone(&id), i);
        nodes.push(CompiledNode {
            id,
            type_id: def.type_id.clone(),
            runner,
            successors: FxHashMap::default(),
            retry,
        });
    }

    // Graph wiring
    for edge in &ir.edges {
        let from = *index
            .get(edge.from.as_str())
            .ok_or_else(|| PflowError::IrReference {
                detail: format!("edge from unknown node '{}'", edge.from),
            })?;
        let to = *index
            .get(edge.to.as_str())
            .ok_or_else(|| PflowError::IrReference {
                detail: format!("edge to unknown node '{}'", edge.to),
            })?;
        if nodes[from].successors.insert(edge.action.clone(), to).is_some() {
            return Err(PflowError::CompileError {
                reason: format!(
                    "node '{}' has two edges for action '{}'",
                    edge.from, edge.action
                ),
            });
        }
    }

    // The action of each edge must be one the source node can emit
    for (i, def) in ir.nodes.iter().enumerate() {
        if nodes[i].successors.is_empty() {
            continue;
        }
        if let Some(entry) = registry.get_unfiltered(&def.type_id) {
            let declared = &entry.interface.actions;
            if !declared.is_empty() {
                for action in nodes[i].successors.keys() {
                    if action != DEFAULT_ACTION
                        && action != ACTION_ERROR
                        && !declared.contains(action)
                    {
                        tracing::warn!(
                            node = %def.id,
                            action = %action,
                            "edge action not in the node's declared actions"
                        );
                    }
                }
            }
        }
    }

    // Start node: first node nothing points at, falling back to declaration
    // order for draft/cyclic-free single-node flows.
    let mut has_incoming = vec![false; nodes.len()];
    for node in &nodes {
        for target in node.successors.values() {
            has_incoming[*target] = true;
        }
    }
    let start = has_incoming.iter().position(|incoming| !incoming).unwrap_or(0);

    Ok(CompiledFlow {
        nodes,
        start,
        index,
        ir,
    })
}

/// Pull `max_attempts` / `wait_seconds` out of the params, if declared
fn extract_retry(params: &mut serde_json::Map<String, serde_json::Value>) -> Option<RetryPolicy> {
    let max_attempts = params
        .remove("max_attempts")
        .and_then(|v| v.as_u64())
        .map(|n| n as u32);
    let wait = params
        .remove("wait_seconds")
        .and_then(|v| v.as_f64())
        .map(Duration::from_secs_f64);

    match (max_attempts, wait) {
        (None, None) => None,
        (attempts, wait) => Some(RetryPolicy::new(
            attempts.unwrap_or(1),
            wait.unwrap_or(Duration::ZERO),
        )),
    }
}

/// PARAM_UNKNOWN is warn-only: typo protection without strictness
fn warn_unknown_params(
    node_id: &str,
    params: &serde_json::Map<String, serde_json::Value>,
    entry: &crate::registry::NodeEntry,
) {
    if entry.interface.params.is_empty() {
        return;
    }
    for key in params.keys() {
        let declared = entry.interface.params.iter().any(|f| f.key == *key);
        if !declared {
            tracing::warn!(
                node = %node_id,
                param = %key,
                node_type = %entry.key,
                "param not in the node's declared interface"
            );
        }
    }
}

fn to_value_map(params: serde_json::Map<String, serde_json::Value>) -> ValueMap {
    params
        .into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect()
}
