//! Agent-facing MCP server - the engine as an orchestration substrate
//!
//! `pflow serve` speaks MCP over stdio and publishes a fixed set of
//! capability tools: `discover_workflows`, `validate_workflow`,
//! `execute_workflow`, `debug_workflow`, `export_workflow`, `browse_nodes`.
//! Each is a thin adapter over the library internals.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::{PflowHome, Settings};
use crate::error::Result;
use crate::ir::WorkflowIr;
use crate::registry::Registry;
use crate::runtime::{run_workflow, validate_workflow, RunOptions};
use crate::store::{Value as StoreValue, ValueMap};
use crate::trace::list_traces;
use crate::workflows;

use super::protocol::{JsonRpcResponse, PROTOCOL_VERSION};

/// The capability-tool server
pub struct CapabilityServer {
    home: PflowHome,
    settings: Settings,
    registry: Registry,
}

impl CapabilityServer {
    pub fn new(home: PflowHome, settings: Settings, registry: Registry) -> Self {
        Self {
            home,
            settings,
            registry,
        }
    }

    /// Read newline-delimited JSON-RPC from stdin until EOF
    pub async fn serve_stdio(&self) -> Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    let response = JsonRpcResponse::failure(None, -32700, e.to_string());
                    write_response(&mut stdout, &response).await?;
                    continue;
                }
            };

            if let Some(response) = self.handle(&request).await {
                write_response(&mut stdout, &response).await?;
            }
        }
        Ok(())
    }

    /// Handle one JSON-RPC message. Notifications yield no response.
    pub async fn handle(&self, request: &Value) -> Option<JsonRpcResponse> {
        let method = request.get("method")?.as_str()?;
        let id = request.get("id").and_then(|i| i.as_u64());
        let params = request.get("params").cloned().unwrap_or(json!({}));

        // Notifications carry no id and expect no reply
        let id = match id {
            Some(id) => id,
            None => return None,
        };

        let response = match method {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "pflow", "version": env!("CARGO_PKG_VERSION")}
                }),
            ),
            "tools/list" => JsonRpcResponse::success(id, json!({"tools": capability_tools()})),
            "tools/call" => {
                let tool = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
                match self.call(tool, arguments).await {
                    Ok(result) => JsonRpcResponse::success(
                        id,
                        json!({
                            "content": [{"type": "text", "text": result.to_string()}],
                            "structuredContent": result,
                        }),
                    ),
                    Err(e) => JsonRpcResponse::success(
                        id,
                        json!({
                            "content": [{"type": "text", "text": e.to_string()}],
                            "isError": true,
                        }),
                    ),
                }
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            other => JsonRpcResponse::failure(Some(id), -32601, format!("unknown method {other}")),
        };
        Some(response)
    }

    async fn call(&self, tool: &str, arguments: Value) -> Result<Value> {
        match tool {
            "discover_workflows" => {
                let infos = workflows::list(&self.home)?;
                Ok(json!({"workflows": infos}))
            }
            "browse_nodes" => {
                let entries = match arguments.get("query").and_then(|q| q.as_str()) {
                    Some(query) => self.registry.search(query),
                    None => self.registry.list(),
                };
                Ok(json!({"nodes": entries}))
            }
            "validate_workflow" => {
                let ir = self.load_source(&arguments)?;
                match validate_workflow(ir, &self.registry) {
                    Ok(()) => Ok(json!({"valid": true})),
                    Err(e) => Ok(json!({
                        "valid": false,
                        "code": e.code(),
                        "category": e.category().to_string(),
                        "message": e.to_string(),
                    })),
                }
            }
            "execute_workflow" => {
                let ir = self.load_source(&arguments)?;
                let inputs = arguments
                    .get("params")
                    .cloned()
                    .map(parse_inputs)
                    .unwrap_or_default();
                let report = run_workflow(
                    ir,
                    &self.registry,
                    &self.home,
                    &self.settings,
                    RunOptions {
                        inputs,
                        ..RunOptions::default()
                    },
                )
                .await?;
                Ok(report.to_json())
            }
            "export_workflow" => {
                let name = arguments
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                let ir = workflows::load(&self.home, name)?;
                Ok(serde_json::to_value(&ir)?)
            }
            "debug_workflow" => {
                let traces = list_traces(&self.home.debug_dir())?;
                let wanted = arguments.get("run_id").and_then(|r| r.as_str());
                let chosen = match wanted {
                    Some(fragment) => traces.iter().find(|t| t.file_name.contains(fragment)),
                    None => traces.first(),
                };
                match chosen {
                    Some(info) => {
                        let content = std::fs::read_to_string(&info.path)?;
                        Ok(serde_json::from_str(&content)?)
                    }
                    None => Ok(json!({"error": "no traces found"})),
                }
            }
            other => Err(crate::error::PflowError::McpProtocol {
                reason: format!("unknown capability tool '{other}'"),
            }),
        }
    }

    /// Accept either an inline IR document (`source`) or a library `name`
    fn load_source(&self, arguments: &Value) -> Result<WorkflowIr> {
        if let Some(source) = arguments.get("source") {
            if let Some(text) = source.as_str() {
                return WorkflowIr::from_json(text);
            }
            return WorkflowIr::from_value(source.clone());
        }
        let name = arguments
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default();
        workflows::load(&self.home, name)
    }
}

fn parse_inputs(params: Value) -> ValueMap {
    match StoreValue::from(params) {
        StoreValue::Map(m) => m,
        _ => ValueMap::new(),
    }
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

fn capability_tools() -> Vec<Value> {
    let source_schema = json!({
        "type": "object",
        "properties": {
            "source": {"description": "Inline canonical IR (object or JSON string)"},
            "name": {"type": "string", "description": "Saved workflow name"}
        }
    });
    vec![
        json!({
            "name": "discover_workflows",
            "description": "List saved workflows with their descriptions",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "validate_workflow",
            "description": "Validate a workflow without executing it",
            "inputSchema": source_schema,
        }),
        json!({
            "name": "execute_workflow",
            "description": "Execute a workflow and return the structured report",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "source": {"description": "Inline canonical IR"},
                    "name": {"type": "string"},
                    "params": {"type": "object", "description": "Workflow input values"}
                }
            }
        }),
        json!({
            "name": "debug_workflow",
            "description": "Fetch the trace document of a past run",
            "inputSchema": {
                "type": "object",
                "properties": {"run_id": {"type": "string"}}
            }
        }),
        json!({
            "name": "export_workflow",
            "description": "Export a saved workflow as canonical IR",
            "inputSchema": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        }),
        json!({
            "name": "browse_nodes",
            "description": "List or search available node types",
            "inputSchema": {
                "type": "object",
                "properties": {"query": {"type": "string"}}
            }
        }),
    ]
}
