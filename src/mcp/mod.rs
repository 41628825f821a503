//! MCP integration - external tool servers as workflow nodes
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`protocol`] | JSON-RPC 2.0 framing |
//! | [`transport`] | Stdio subprocess + HTTP endpoint plumbing |
//! | [`client`] | Handshake, tools/list, tools/call |
//! | [`config`] | Standard `mcpServers` file + env expansion |
//! | [`discovery`] | Tool catalog discovery with mtime/hash cache |
//! | [`node`] | Universal MCP node behavior |
//! | [`serve`] | Agent-facing MCP server over stdio |

pub mod client;
pub mod config;
pub mod discovery;
pub mod node;
pub mod protocol;
pub mod serve;
pub mod transport;

pub use client::{McpClient, ToolDefinition, ToolOutcome};
pub use config::{McpServersFile, ServerDef};
pub use discovery::{parse_virtual_type_id, virtual_type_id, SyncReport};

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::error::{PflowError, Result};

use transport::{HttpTransport, StdioTransport};

/// Runtime gateway the universal MCP node calls through.
///
/// Owns the expanded server definitions. Every tool call spawns a fresh
/// server, calls once, and stops it - subprocesses never outlive the call.
pub struct McpRuntime {
    servers: BTreeMap<String, ServerDef>,
    verbose: bool,
    /// Canned results keyed by `server/tool`, for tests
    mock_results: Option<FxHashMap<String, serde_json::Value>>,
}

impl McpRuntime {
    /// No servers configured (tests, workflows without MCP nodes)
    pub fn empty() -> Self {
        Self {
            servers: BTreeMap::new(),
            verbose: false,
            mock_results: None,
        }
    }

    pub fn new(config: McpServersFile, verbose: bool) -> Self {
        Self {
            servers: config.servers,
            verbose,
            mock_results: None,
        }
    }

    /// Mock runtime: `server/tool` keys map to raw MCP result values
    pub fn with_mock(results: FxHashMap<String, serde_json::Value>) -> Self {
        let servers = results
            .keys()
            .filter_map(|key| key.split_once('/').map(|(s, _)| s.to_string()))
            .map(|name| {
                (
                    name,
                    ServerDef::Stdio {
                        command: "mock".to_string(),
                        args: vec![],
                        env: BTreeMap::new(),
                        transport: None,
                    },
                )
            })
            .collect();
        Self {
            servers,
            verbose: false,
            mock_results: Some(results),
        }
    }

    pub fn has_server(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn server(&self, name: &str) -> Option<&ServerDef> {
        self.servers.get(name)
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }

    async fn connect(&self, name: &str) -> Result<McpClient> {
        let def = self
            .servers
            .get(name)
            .ok_or_else(|| PflowError::McpNotConfigured {
                name: name.to_string(),
            })?
            .expanded();
        match def {
            ServerDef::Stdio {
                command, args, env, ..
            } => {
                let transport = StdioTransport::new(&command, &args)
                    .with_env(env)
                    .with_verbose(self.verbose);
                McpClient::connect_stdio(name, transport).await
            }
            ServerDef::Http { url, headers, .. } => {
                McpClient::connect_http(name, HttpTransport::new(&url, headers)).await
            }
        }
    }

    /// Spawn, call once, stop. The stop runs on both success and failure.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutcome> {
        if let Some(mock) = &self.mock_results {
            let key = format!("{server}/{tool}");
            return match mock.get(&key) {
                Some(result) => Ok(ToolOutcome::from_result(result)),
                None => Err(PflowError::McpNotConfigured {
                    name: server.to_string(),
                }),
            };
        }

        let client = self.connect(server).await?;
        let outcome = client.call_tool(tool, arguments).await;
        client.stop().await;
        outcome
    }

    /// Spawn, list tools, stop (CLI `mcp tools` and discovery)
    pub async fn list_tools(&self, server: &str) -> Result<Vec<ToolDefinition>> {
        if self.mock_results.is_some() {
            return Ok(vec![]);
        }
        let client = self.connect(server).await?;
        let tools = client.list_tools().await;
        client.stop().await;
        tools
    }
}

impl std::fmt::Debug for McpRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpRuntime")
            .field("servers", &self.servers.keys().collect::<Vec<_>>())
            .field("mock", &self.mock_results.is_some())
            .finish()
    }
}
