//! MCP server configuration - the standard `mcpServers` file format
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "filesystem": {
//!       "command": "npx",
//!       "args": ["-y", "@mcp-fs", "/tmp"],
//!       "env": {"X": "${X:-default}"},
//!       "type": "stdio"
//!     },
//!     "search": {"url": "https://mcp.example.com", "type": "http"}
//!   }
//! }
//! ```
//!
//! Environment expansion supports `${VAR}` and `${VAR:-default}` forms,
//! recursively through args, env values, URLs, and headers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PflowError, Result};

/// `${VAR}` or `${VAR:-default}`
static ENV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap());

/// One configured server: stdio subprocess or HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ServerDef {
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(rename = "type")]
        transport: String,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        transport: Option<String>,
    },
}

impl ServerDef {
    /// Stable hash of the definition for cache invalidation
    pub fn definition_hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        format!("{:016x}", xxhash_rust::xxh3::xxh3_64(canonical.as_bytes()))
    }

    /// Expand `${VAR}` / `${VAR:-default}` against the process environment
    pub fn expanded(&self) -> Self {
        match self {
            Self::Stdio {
                command,
                args,
                env,
                transport,
            } => Self::Stdio {
                command: expand_env(command),
                args: args.iter().map(|a| expand_env(a)).collect(),
                env: env
                    .iter()
                    .map(|(k, v)| (k.clone(), expand_env(v)))
                    .collect(),
                transport: transport.clone(),
            },
            Self::Http {
                url,
                headers,
                transport,
            } => Self::Http {
                url: expand_env(url),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.clone(), expand_env(v)))
                    .collect(),
                transport: transport.clone(),
            },
        }
    }
}

/// Expand environment references in one string, recursively.
///
/// Recursion handles defaults that themselves contain references; depth is
/// bounded to stop self-referential loops.
pub fn expand_env(input: &str) -> String {
    expand_env_depth(input, 0)
}

fn expand_env_depth(input: &str, depth: u8) -> String {
    if depth > 8 || !input.contains("${") {
        return input.to_string();
    }
    let expanded = ENV_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let var = &caps[1];
            match std::env::var(var) {
                Ok(value) if !value.is_empty() => value,
                _ => caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            }
        })
        .into_owned();
    if expanded.contains("${") && expanded != input {
        expand_env_depth(&expanded, depth + 1)
    } else {
        expanded
    }
}

/// The whole `mcp-servers.json` document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct McpServersFile {
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, ServerDef>,
}

impl McpServersFile {
    /// Load from disk; a missing file is an empty config
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| PflowError::ConfigError {
            reason: format!("malformed {}: {e}", path.display()),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServerDef> {
        self.servers.get(name)
    }

    pub fn add(&mut self, name: impl Into<String>, def: ServerDef) {
        self.servers.insert(name.into(), def);
    }

    pub fn remove(&mut self, name: &str) -> Option<ServerDef> {
        self.servers.remove(name)
    }

    /// Per-server definition hashes, for discovery cache invalidation
    pub fn server_hashes(&self) -> BTreeMap<String, String> {
        self.servers
            .iter()
            .map(|(name, def)| (name.clone(), def.definition_hash()))
            .collect()
    }

    /// File mtime in milliseconds since epoch, 0 when the file is absent
    pub fn mtime_ms(path: &Path) -> u64 {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
