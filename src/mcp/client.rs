//! MCP client - initialize handshake, tool discovery, tool calls
//!
//! One client per server session. The execution model spawns a fresh
//! subprocess per call and stops it afterwards, so a client's life is
//! short: connect → (list_tools | call_tool) → stop.
//!
//! Request/response cycles are serialized with an async mutex: stdio is a
//! shared pipe, and interleaved writers would corrupt the framing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{PflowError, Result};

use super::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use super::transport::{HttpTransport, StdioTransport};

/// Per-operation timeout; MCP servers that take longer are stuck
const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool advertised by a server
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

/// The outcome of one tool call, decoded from the MCP result shape
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// `structuredContent`, when the tool returned typed data
    pub structured: Option<serde_json::Value>,
    /// Concatenated text blocks from the content array
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    /// Decode the MCP `tools/call` result:
    /// `{content: [{type: "text", text}...], structuredContent?, isError?}`
    pub fn from_result(result: &serde_json::Value) -> Self {
        let structured = result.get("structuredContent").cloned();
        let text = result
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        let is_error = result
            .get("isError")
            .and_then(|e| e.as_bool())
            .unwrap_or(false);
        Self {
            structured,
            text,
            is_error,
        }
    }
}

struct StdioConn {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

enum ClientTransport {
    Stdio(AsyncMutex<Option<StdioConn>>),
    Http(HttpTransport),
}

/// MCP client over one transport
pub struct McpClient {
    name: String,
    transport: ClientTransport,
    request_id: AtomicU64,
    io_lock: AsyncMutex<()>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Spawn a stdio server and perform the initialize handshake
    pub async fn connect_stdio(name: &str, transport: StdioTransport) -> Result<Self> {
        let mut child = transport.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| PflowError::McpStartError {
            name: name.to_string(),
            reason: "stdin not piped".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| PflowError::McpStartError {
            name: name.to_string(),
            reason: "stdout not piped".to_string(),
        })?;

        let client = Self {
            name: name.to_string(),
            transport: ClientTransport::Stdio(AsyncMutex::new(Some(StdioConn {
                child,
                stdin,
                reader: BufReader::new(stdout),
            }))),
            request_id: AtomicU64::new(1),
            io_lock: AsyncMutex::new(()),
        };
        client.initialize().await?;
        Ok(client)
    }

    /// Connect to an HTTP endpoint and perform the initialize handshake
    pub async fn connect_http(name: &str, transport: HttpTransport) -> Result<Self> {
        let client = Self {
            name: name.to_string(),
            transport: ClientTransport::Http(transport),
            request_id: AtomicU64::new(1),
            io_lock: AsyncMutex::new(()),
        };
        client.initialize().await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// MCP handshake: `initialize` request, then the `initialized`
    /// notification. Tool calls are only legal afterwards.
    async fn initialize(&self) -> Result<()> {
        let request = JsonRpcRequest::new(
            self.next_id(),
            "initialize",
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "pflow", "version": env!("CARGO_PKG_VERSION")}
            }),
        );
        let response = self.send_request(&request, "initialize").await?;
        if !response.is_success() {
            return Err(PflowError::McpStartError {
                name: self.name.clone(),
                reason: response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "initialize rejected".to_string()),
            });
        }
        self.send_notification(&JsonRpcNotification::new("notifications/initialized"))
            .await
    }

    /// List tools advertised by the server
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let request = JsonRpcRequest::new(self.next_id(), "tools/list", serde_json::json!({}));
        let response = self.send_request(&request, "tools/list").await?;

        if let Some(error) = response.error {
            return Err(PflowError::McpProtocol {
                reason: format!("tools/list failed: {}", error.message),
            });
        }
        let result = response.result.ok_or_else(|| PflowError::McpProtocol {
            reason: "empty tools/list result".to_string(),
        })?;

        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|item| {
                        Some(ToolDefinition {
                            name: item.get("name")?.as_str()?.to_string(),
                            description: item
                                .get("description")
                                .and_then(|d| d.as_str())
                                .map(str::to_string),
                            input_schema: item.get("inputSchema").cloned(),
                            output_schema: item.get("outputSchema").cloned(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(tools)
    }

    /// Call one tool. Tool-level errors (`isError`) come back in the
    /// outcome, not as `Err` - the caller decides how to surface them.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutcome> {
        let request = JsonRpcRequest::new(
            self.next_id(),
            "tools/call",
            serde_json::json!({"name": tool, "arguments": arguments}),
        );
        let response = self.send_request(&request, tool).await?;

        if let Some(error) = response.error {
            return Err(PflowError::ToolError {
                server: self.name.clone(),
                tool: tool.to_string(),
                message: error.message,
                data: error.data,
            });
        }
        let result = response.result.ok_or_else(|| PflowError::McpProtocol {
            reason: format!("empty result for tool '{tool}'"),
        })?;
        Ok(ToolOutcome::from_result(&result))
    }

    /// Terminate the server subprocess (no-op for HTTP). Best-effort and
    /// idempotent: cleanup paths call this without caring about the result.
    pub async fn stop(&self) {
        if let ClientTransport::Stdio(conn) = &self.transport {
            if let Some(mut conn) = conn.lock().await.take() {
                let _ = conn.child.kill().await;
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // TRANSPORT IO
    // ═══════════════════════════════════════════════════════════════

    async fn send_request(
        &self,
        request: &JsonRpcRequest,
        operation: &str,
    ) -> Result<JsonRpcResponse> {
        let _io_guard = self.io_lock.lock().await;

        let work = async {
            match &self.transport {
                ClientTransport::Http(http) => {
                    let body = serde_json::to_value(request)?;
                    let response = http.post(&body).await?;
                    serde_json::from_value(response).map_err(|e| PflowError::McpProtocol {
                        reason: format!("invalid JSON-RPC response: {e}"),
                    })
                }
                ClientTransport::Stdio(conn) => {
                    let mut guard = conn.lock().await;
                    let conn = guard.as_mut().ok_or_else(|| PflowError::McpProtocol {
                        reason: format!("server '{}' already stopped", self.name),
                    })?;

                    let mut line = serde_json::to_string(request)?;
                    line.push('\n');
                    conn.stdin
                        .write_all(line.as_bytes())
                        .await
                        .map_err(|e| PflowError::McpProtocol {
                            reason: format!("write to '{}' failed: {e}", self.name),
                        })?;
                    conn.stdin.flush().await.map_err(|e| PflowError::McpProtocol {
                        reason: format!("flush to '{}' failed: {e}", self.name),
                    })?;

                    // Skip server-initiated notifications until our response
                    loop {
                        let mut response_line = String::new();
                        let read = conn.reader.read_line(&mut response_line).await.map_err(
                            |e| PflowError::McpProtocol {
                                reason: format!("read from '{}' failed: {e}", self.name),
                            },
                        )?;
                        if read == 0 {
                            return Err(PflowError::McpProtocol {
                                reason: format!("server '{}' closed its pipe", self.name),
                            });
                        }
                        let parsed: serde_json::Value = serde_json::from_str(&response_line)
                            .map_err(|e| PflowError::McpProtocol {
                                reason: format!(
                                    "invalid JSON from '{}': {e} (line: {})",
                                    self.name,
                                    response_line.trim()
                                ),
                            })?;
                        if parsed.get("id").is_some() {
                            return serde_json::from_value(parsed).map_err(|e| {
                                PflowError::McpProtocol {
                                    reason: format!("invalid JSON-RPC response: {e}"),
                                }
                            });
                        }
                    }
                }
            }
        };

        tokio::time::timeout(OPERATION_TIMEOUT, work)
            .await
            .map_err(|_| PflowError::McpTimeout {
                name: self.name.clone(),
                operation: operation.to_string(),
                timeout_secs: OPERATION_TIMEOUT.as_secs(),
            })?
    }

    async fn send_notification(&self, notification: &JsonRpcNotification) -> Result<()> {
        match &self.transport {
            ClientTransport::Http(http) => {
                let body = serde_json::to_value(notification)?;
                // Servers respond 202 with no body; errors are non-fatal here
                let _ = http.post(&body).await;
                Ok(())
            }
            ClientTransport::Stdio(conn) => {
                let mut guard = conn.lock().await;
                let conn = guard.as_mut().ok_or_else(|| PflowError::McpProtocol {
                    reason: format!("server '{}' already stopped", self.name),
                })?;
                let mut line = serde_json::to_string(notification)?;
                line.push('\n');
                conn.stdin
                    .write_all(line.as_bytes())
                    .await
                    .map_err(|e| PflowError::McpProtocol {
                        reason: format!("notify '{}' failed: {e}", self.name),
                    })?;
                conn.stdin.flush().await.map_err(|e| PflowError::McpProtocol {
                    reason: format!("flush to '{}' failed: {e}", self.name),
                })?;
                Ok(())
            }
        }
    }
}
