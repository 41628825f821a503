//! MCP tool discovery - catalog sync with mtime/hash cache invalidation
//!
//! At startup, if the config file's mtime or any server's definition hash
//! changed since the last discovery, each configured server is started
//! once, asked for `tools/list`, and stopped. Every tool becomes a virtual
//! registry entry keyed `mcp-{server}-{tool}`. An unchanged config is a
//! cache hit: entries come from disk and no subprocess spawns.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PflowError, Result};
use crate::registry::{InterfaceField, NodeEntry, NodeInterface, Registry, VIRTUAL_MCP_PATH};

use super::client::ToolDefinition;
use super::config::McpServersFile;
use super::McpRuntime;

/// Virtual type id for a server/tool pair
pub fn virtual_type_id(server: &str, tool: &str) -> String {
    format!("mcp-{server}-{tool}")
}

/// Split a virtual type id back into `(server, tool)`.
///
/// The server name is the single segment after `mcp-`; everything after the
/// next dash is the tool (tool names may themselves contain dashes).
pub fn parse_virtual_type_id(type_id: &str) -> Option<(&str, &str)> {
    let rest = type_id.strip_prefix("mcp-")?;
    let (server, tool) = rest.split_once('-')?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// Discovery state persisted alongside the registry cache
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryState {
    pub config_mtime_ms: u64,
    pub server_hashes: BTreeMap<String, String>,
}

/// What a sync did
#[derive(Debug)]
pub struct SyncReport {
    pub cache_hit: bool,
    pub servers: usize,
    pub tools_registered: usize,
}

/// Synchronize the registry's virtual entries with the configured servers.
///
/// Idempotent on an unchanged config: the cached catalog is loaded and no
/// server process is spawned.
pub async fn sync(
    config_path: &Path,
    cache_path: &Path,
    registry: &mut Registry,
    verbose: bool,
) -> Result<SyncReport> {
    let config = McpServersFile::load(config_path)?;
    let current = DiscoveryState {
        config_mtime_ms: McpServersFile::mtime_ms(config_path),
        server_hashes: config.server_hashes(),
    };

    if let Some(cached) = read_state(cache_path) {
        if cached == current {
            let loaded = registry.load_cache(cache_path)?;
            tracing::debug!(tools = loaded, "MCP discovery cache hit");
            return Ok(SyncReport {
                cache_hit: true,
                servers: config.servers.len(),
                tools_registered: loaded,
            });
        }
    }

    let runtime = McpRuntime::new(config.clone(), verbose);
    let mut tools_registered = 0;

    for name in config.servers.keys() {
        let tools = match runtime.list_tools(name).await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "MCP discovery failed for server");
                continue;
            }
        };
        for tool in tools {
            registry.register_virtual(entry_for_tool(name, &tool));
            tools_registered += 1;
        }
    }

    write_cache(registry, &current, cache_path)?;
    tracing::info!(
        servers = config.servers.len(),
        tools = tools_registered,
        "MCP discovery complete"
    );

    Ok(SyncReport {
        cache_hit: false,
        servers: config.servers.len(),
        tools_registered,
    })
}

/// Build the virtual registry entry for one discovered tool
pub fn entry_for_tool(server: &str, tool: &ToolDefinition) -> NodeEntry {
    let params = tool
        .input_schema
        .as_ref()
        .and_then(|schema| {
            let required: Vec<&str> = schema
                .get("required")
                .and_then(|r| r.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            let properties = schema.get("properties")?.as_object()?;
            Some(
                properties
                    .iter()
                    .map(|(key, prop)| InterfaceField {
                        key: key.clone(),
                        type_name: prop
                            .get("type")
                            .and_then(|t| t.as_str())
                            .unwrap_or("any")
                            .to_string(),
                        description: prop
                            .get("description")
                            .and_then(|d| d.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        required: required.contains(&key.as_str()),
                    })
                    .collect(),
            )
        })
        .unwrap_or_default();

    NodeEntry {
        key: virtual_type_id(server, &tool.name),
        class_name: "McpToolNode".to_string(),
        module_path: "pflow::mcp::node".to_string(),
        file_path: VIRTUAL_MCP_PATH.to_string(),
        interface: NodeInterface {
            description: tool
                .description
                .clone()
                .unwrap_or_else(|| format!("MCP tool {} on server {server}", tool.name)),
            inputs: vec![],
            params,
            outputs: vec![InterfaceField::required(
                "result",
                "any",
                "Tool result (structured fields are unpacked alongside)",
            )],
            actions: vec!["default".to_string()],
        },
    }
}

fn read_state(cache_path: &Path) -> Option<DiscoveryState> {
    let content = std::fs::read_to_string(cache_path).ok()?;
    let doc: serde_json::Value = serde_json::from_str(&content).ok()?;
    serde_json::from_value(doc.get("mcp_discovery")?.clone()).ok()
}

/// Write the registry cache document including the discovery state.
///
/// This is the single writer of `registry-cache.json`; the registry's own
/// `save_cache` exists for tooling that has no discovery state.
pub fn write_cache(registry: &Registry, state: &DiscoveryState, cache_path: &Path) -> Result<()> {
    let entries: Vec<&NodeEntry> = registry.load(true);
    let doc = serde_json::json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "entries": entries,
        "mcp_discovery": state,
    });
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(cache_path, serde_json::to_string_pretty(&doc)?)
        .map_err(PflowError::from)
}
