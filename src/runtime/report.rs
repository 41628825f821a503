//! Execution report - the structured state repair agents rely on
//!
//! For every node: status (`completed` / `failed` / `not_executed`),
//! duration, attempts, cache hit, auto-repair flag. On failure, a rich
//! error record with the category, available variables/fields, raw
//! responses, and structured MCP errors where retained.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{ErrorCategory, PflowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    Failed,
    NotExecuted,
}

/// Per-node execution state
#[derive(Debug, Clone, Serialize)]
pub struct NodeState {
    pub status: NodeStatus,
    pub duration_ms: u64,
    pub attempts: u32,
    pub cache_hit: bool,
    pub repaired: bool,
}

impl NodeState {
    pub fn not_executed() -> Self {
        Self {
            status: NodeStatus::NotExecuted,
            duration_ms: 0,
            attempts: 0,
            cache_hit: false,
            repaired: false,
        }
    }
}

/// Structured per-node error record
#[derive(Debug, Clone, Serialize)]
pub struct NodeError {
    pub node_id: String,
    /// Stable error code, e.g. "PFLOW-030"
    pub code: String,
    pub message: String,
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_variables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_error: Option<serde_json::Value>,
}

impl NodeError {
    /// Enrich a raw error with node identity and category-specific fields
    pub fn from_error(node_id: &str, error: &PflowError) -> Self {
        use crate::error::FixSuggestion;

        let mut record = Self {
            node_id: node_id.to_string(),
            code: error.code().to_string(),
            message: error.to_string(),
            category: error.category(),
            suggestion: error.fix_suggestion().map(str::to_string),
            available_variables: None,
            available_fields: None,
            status_code: None,
            raw_response: None,
            mcp_error: None,
        };

        match error {
            PflowError::TemplateUnresolved {
                available_variables,
                available_fields,
                ..
            } => {
                record.available_variables = Some(available_variables.clone());
                record.available_fields = available_fields.clone();
            }
            PflowError::HttpStatus { status, body } => {
                record.status_code = Some(*status);
                record.raw_response = Some(body.clone());
            }
            PflowError::ToolError { data, .. } => {
                record.mcp_error = data.clone();
            }
            _ => {}
        }
        record
    }
}

/// The full result of one workflow execution
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub run_id: String,
    pub duration_ms: u64,
    /// Declared outputs, rendered from the final store
    pub outputs: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    pub nodes: BTreeMap<String, NodeState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<PathBuf>,
}

impl ExecutionReport {
    /// The JSON envelope handed to repair agents (`--json` mode)
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Node summary section of the trace document
    pub fn node_summary(&self) -> serde_json::Value {
        serde_json::to_value(&self.nodes).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_error_carries_available_variables() {
        let error = PflowError::TemplateUnresolved {
            template: "${repoo}".into(),
            variable: "repoo".into(),
            available_variables: vec!["repo".into()],
            available_fields: None,
        };
        let record = NodeError::from_error("clone", &error);
        assert_eq!(record.code, "PFLOW-030");
        assert_eq!(record.category, ErrorCategory::Template);
        assert_eq!(record.available_variables, Some(vec!["repo".to_string()]));
        assert!(record.suggestion.is_some());
    }

    #[test]
    fn http_error_carries_status_and_body() {
        let error = PflowError::HttpStatus {
            status: 503,
            body: "upstream down".into(),
        };
        let record = NodeError::from_error("fetch", &error);
        assert_eq!(record.status_code, Some(503));
        assert_eq!(record.raw_response.as_deref(), Some("upstream down"));
        assert_eq!(record.category, ErrorCategory::Network);
    }

    #[test]
    fn tool_error_carries_structured_data() {
        let error = PflowError::ToolError {
            server: "filesystem".into(),
            tool: "read_text_file".into(),
            message: "denied".into(),
            data: Some(serde_json::json!({"path": "/private/tmp"})),
        };
        let record = NodeError::from_error("read", &error);
        assert_eq!(record.category, ErrorCategory::Tool);
        assert_eq!(
            record.mcp_error,
            Some(serde_json::json!({"path": "/private/tmp"}))
        );
    }

    #[test]
    fn report_serializes_statuses_snake_case() {
        let mut nodes = BTreeMap::new();
        nodes.insert("a".to_string(), NodeState::not_executed());
        let report = ExecutionReport {
            success: false,
            run_id: "r".into(),
            duration_ms: 10,
            outputs: BTreeMap::new(),
            error: None,
            nodes,
            trace_path: None,
        };
        let json = report.to_json();
        assert_eq!(json["nodes"]["a"]["status"], "not_executed");
        assert_eq!(json["success"], false);
    }
}
