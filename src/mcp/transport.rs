//! MCP transport - server subprocess lifecycle and HTTP endpoint plumbing
//!
//! Stdio servers communicate over newline-delimited JSON-RPC on
//! stdin/stdout. Each spawn pipes both; stderr is suppressed unless verbose
//! mode asks for it.

use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::error::{PflowError, Result};

/// Spawns one MCP server subprocess
#[derive(Debug)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    verbose: bool,
}

impl StdioTransport {
    pub fn new(command: &str, args: &[String]) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
            env: BTreeMap::new(),
            verbose: false,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Verbose mode lets the server's stderr through for debugging
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Spawn the server with stdin/stdout piped for JSON-RPC
    pub fn spawn(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd.spawn().map_err(|e| PflowError::McpStartError {
            name: self.command.clone(),
            reason: e.to_string(),
        })
    }
}

/// POSTs JSON-RPC requests to an HTTP MCP endpoint
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(url: &str, headers: BTreeMap<String, String>) -> Self {
        Self {
            url: url.to_string(),
            headers,
            client: reqwest::Client::new(),
        }
    }

    pub async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut request = self.client.post(&self.url).json(body);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|e| PflowError::McpProtocol {
            reason: format!("HTTP transport failed: {e}"),
        })?;
        response.json().await.map_err(|e| PflowError::McpProtocol {
            reason: format!("non-JSON response from MCP endpoint: {e}"),
        })
    }
}
