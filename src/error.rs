//! pflow Error Types with Error Codes
//!
//! Error code ranges:
//! - PFLOW-000-009: IR load/schema errors
//! - PFLOW-010-019: Registry errors
//! - PFLOW-020-029: Compile errors
//! - PFLOW-030-039: Template errors
//! - PFLOW-040-049: Node runtime errors
//! - PFLOW-050-059: Batch errors
//! - PFLOW-060-069: MCP errors
//! - PFLOW-070-079: Config/settings errors
//! - PFLOW-090-099: IO/serialization errors
//!
//! Every error maps to a repair-surface category via [`PflowError::category`];
//! the category is what downstream repair agents key on, the code is what
//! humans grep for.

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PflowError>;

/// Repair-surface error categories.
///
/// Serialized into JSON error envelopes; repair agents decide what to retry
/// vs regenerate based on this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Schema,
    Reference,
    Compilation,
    Template,
    Network,
    Auth,
    RateLimit,
    Tool,
    Runtime,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Schema => "schema",
            Self::Reference => "reference",
            Self::Compilation => "compilation",
            Self::Template => "template",
            Self::Network => "network",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Tool => "tool",
            Self::Runtime => "runtime",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Format a list of available variables for display
fn format_available(vars: &[String]) -> String {
    if vars.is_empty() {
        return "(none)".to_string();
    }
    vars.join(", ")
}

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for fancy terminal error display.
#[derive(Error, Debug, Diagnostic)]
pub enum PflowError {
    // ═══════════════════════════════════════════
    // IR LOAD / SCHEMA ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[PFLOW-001] Failed to parse workflow: {details}")]
    #[diagnostic(
        code(pflow::parse_error),
        help("Check JSON syntax, or markdown structure for .pflow.md files")
    )]
    ParseError { details: String },

    #[error("[PFLOW-002] Workflow file not found: {path}")]
    #[diagnostic(code(pflow::workflow_not_found), help("Check the file path exists"))]
    WorkflowNotFound { path: String },

    #[error("[PFLOW-003] Schema violation at '{pointer}': {message}")]
    #[diagnostic(
        code(pflow::ir_schema),
        help("Check the document against schemas/pflow-ir.schema.json")
    )]
    IrSchema { pointer: String, message: String },

    #[error("[PFLOW-004] Missing or unsupported ir_version: {version}")]
    #[diagnostic(
        code(pflow::ir_version),
        help("Declare \"ir_version\": \"0.1.0\" at the top level")
    )]
    IrVersion { version: String },

    #[error("[PFLOW-005] Reference error: {detail}")]
    #[diagnostic(
        code(pflow::ir_reference),
        help("Edge endpoints and template roots must name declared inputs or nodes")
    )]
    IrReference { detail: String },

    #[error("[PFLOW-006] Cycle detected in workflow graph: {cycle}")]
    #[diagnostic(
        code(pflow::ir_cycle),
        help("Remove circular edges; retries are executor state, not edges")
    )]
    IrCycle { cycle: String },

    // ═══════════════════════════════════════════
    // REGISTRY ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[PFLOW-010] Unknown node type '{type_id}'{}", suggestion_suffix(.suggestions))]
    #[diagnostic(
        code(pflow::registry_miss),
        help("Run `pflow nodes list` to see available node types")
    )]
    RegistryMiss {
        type_id: String,
        suggestions: Vec<String>,
    },

    #[error("[PFLOW-011] Registry cache error: {reason}")]
    RegistryCache { reason: String },

    // ═══════════════════════════════════════════
    // COMPILE ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[PFLOW-020] Compile error: {reason}")]
    #[diagnostic(code(pflow::compile))]
    CompileError { reason: String },

    #[error("[PFLOW-021] Output '{output}' source references unknown node in '{source_node}'")]
    #[diagnostic(
        code(pflow::output_source_unknown),
        help("Output sources must reference a declared node's namespace")
    )]
    OutputSourceUnknown { output: String, source_node: String },

    // ═══════════════════════════════════════════
    // TEMPLATE ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[PFLOW-030] Unresolved template variable '{variable}' in '{template}' (available: {})", format_available(.available_variables))]
    #[diagnostic(
        code(pflow::template_unresolved),
        help("Reference a declared input, a node output as node_id.key, or a context key")
    )]
    TemplateUnresolved {
        template: String,
        variable: String,
        available_variables: Vec<String>,
        /// Populated when the variable root resolves but a sub-path does not
        available_fields: Option<Vec<String>>,
    },

    #[error("[PFLOW-031] Template type mismatch in '{template}': {detail}")]
    #[diagnostic(
        code(pflow::template_type_mismatch),
        help("Binary values only pass through single-reference templates like \"${{node.key}}\"")
    )]
    TemplateTypeMismatch { template: String, detail: String },

    #[error("[PFLOW-032] Cannot traverse '{segment}' on {value_type} (expected map/list)")]
    InvalidTraversal {
        segment: String,
        value_type: String,
        full_path: String,
    },

    // ═══════════════════════════════════════════
    // NODE RUNTIME ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[PFLOW-040] Node '{node_id}' failed: {reason}")]
    #[diagnostic(code(pflow::node_runtime))]
    NodeRuntime { node_id: String, reason: String },

    #[error("[PFLOW-041] Node '{node_id}' timed out after {timeout_ms}ms")]
    NodeTimeout { node_id: String, timeout_ms: u64 },

    #[error("[PFLOW-042] Authentication failed in node '{node_id}': {reason}")]
    #[diagnostic(
        code(pflow::node_auth),
        help("Check the relevant API key or credential env var is set")
    )]
    NodeAuth { node_id: String, reason: String },

    #[error("[PFLOW-043] Rate limited in node '{node_id}': {reason}")]
    NodeRateLimit { node_id: String, reason: String },

    #[error("[PFLOW-044] HTTP request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    // ═══════════════════════════════════════════
    // BATCH ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[PFLOW-050] Batch items for node '{node_id}' resolved to {actual}, expected a list")]
    BatchItemsNotList { node_id: String, actual: String },

    #[error("[PFLOW-051] Batch in node '{node_id}' failed at item(s) {}: {reason}", format_indices(.failed))]
    #[diagnostic(
        code(pflow::batch_failed),
        help("Set fail_fast: false in the batch config to capture per-item errors instead")
    )]
    BatchFailed {
        node_id: String,
        failed: Vec<usize>,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // MCP ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[PFLOW-060] MCP server '{name}' failed to start: {reason}")]
    #[diagnostic(
        code(pflow::mcp_start),
        help("Check the command and args in mcp-servers.json")
    )]
    McpStartError { name: String, reason: String },

    #[error("[PFLOW-061] MCP server '{name}' not configured")]
    #[diagnostic(
        code(pflow::mcp_not_configured),
        help("Add the server with `pflow mcp add` and re-sync")
    )]
    McpNotConfigured { name: String },

    #[error("[PFLOW-062] MCP protocol error: {reason}")]
    McpProtocol { reason: String },

    #[error("[PFLOW-063] Tool '{tool}' on server '{server}' failed: {message}")]
    #[diagnostic(
        code(pflow::tool_error),
        help("Check tool arguments against the tool's input schema")
    )]
    ToolError {
        server: String,
        tool: String,
        message: String,
        /// Structured error payload from the tool, when present
        data: Option<serde_json::Value>,
    },

    #[error("[PFLOW-064] MCP operation '{operation}' on '{name}' exceeded {timeout_secs}s")]
    McpTimeout {
        name: String,
        operation: String,
        timeout_secs: u64,
    },

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (070-079)
    // ═══════════════════════════════════════════
    #[error("[PFLOW-070] Config error: {reason}")]
    #[diagnostic(
        code(pflow::config),
        help("Check ~/.pflow/settings.json for syntax errors")
    )]
    ConfigError { reason: String },

    #[error("[PFLOW-071] Workflow '{name}' not found in library")]
    WorkflowNotInLibrary { name: String },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION (090-099)
    // ═══════════════════════════════════════════
    #[error("[PFLOW-093] IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("[PFLOW-094] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("[PFLOW-095] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // ═══════════════════════════════════════════
    // TERMINAL STATES
    // ═══════════════════════════════════════════
    #[error("[PFLOW-130] Execution cancelled")]
    Cancelled,

    #[error("[PFLOW-199] Internal error: {reason}")]
    Internal { reason: String },
}

fn suggestion_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

fn format_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl PflowError {
    /// Get the error code (e.g., "PFLOW-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "PFLOW-001",
            Self::WorkflowNotFound { .. } => "PFLOW-002",
            Self::IrSchema { .. } => "PFLOW-003",
            Self::IrVersion { .. } => "PFLOW-004",
            Self::IrReference { .. } => "PFLOW-005",
            Self::IrCycle { .. } => "PFLOW-006",
            Self::RegistryMiss { .. } => "PFLOW-010",
            Self::RegistryCache { .. } => "PFLOW-011",
            Self::CompileError { .. } => "PFLOW-020",
            Self::OutputSourceUnknown { .. } => "PFLOW-021",
            Self::TemplateUnresolved { .. } => "PFLOW-030",
            Self::TemplateTypeMismatch { .. } => "PFLOW-031",
            Self::InvalidTraversal { .. } => "PFLOW-032",
            Self::NodeRuntime { .. } => "PFLOW-040",
            Self::NodeTimeout { .. } => "PFLOW-041",
            Self::NodeAuth { .. } => "PFLOW-042",
            Self::NodeRateLimit { .. } => "PFLOW-043",
            Self::HttpStatus { .. } => "PFLOW-044",
            Self::BatchItemsNotList { .. } => "PFLOW-050",
            Self::BatchFailed { .. } => "PFLOW-051",
            Self::McpStartError { .. } => "PFLOW-060",
            Self::McpNotConfigured { .. } => "PFLOW-061",
            Self::McpProtocol { .. } => "PFLOW-062",
            Self::ToolError { .. } => "PFLOW-063",
            Self::McpTimeout { .. } => "PFLOW-064",
            Self::ConfigError { .. } => "PFLOW-070",
            Self::WorkflowNotInLibrary { .. } => "PFLOW-071",
            Self::IoError(_) => "PFLOW-093",
            Self::JsonError(_) => "PFLOW-094",
            Self::YamlParse(_) => "PFLOW-095",
            Self::Cancelled => "PFLOW-130",
            Self::Internal { .. } => "PFLOW-199",
        }
    }

    /// Map the error onto the repair-surface category taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ParseError { .. }
            | Self::IrSchema { .. }
            | Self::IrVersion { .. }
            | Self::YamlParse(_) => ErrorCategory::Schema,
            Self::WorkflowNotFound { .. }
            | Self::IrReference { .. }
            | Self::IrCycle { .. }
            | Self::OutputSourceUnknown { .. }
            | Self::WorkflowNotInLibrary { .. } => ErrorCategory::Reference,
            Self::RegistryMiss { .. } | Self::RegistryCache { .. } | Self::CompileError { .. } => {
                ErrorCategory::Compilation
            }
            Self::TemplateUnresolved { .. }
            | Self::TemplateTypeMismatch { .. }
            | Self::InvalidTraversal { .. } => ErrorCategory::Template,
            Self::HttpStatus { status, .. } => match status {
                401 | 403 => ErrorCategory::Auth,
                429 => ErrorCategory::RateLimit,
                _ => ErrorCategory::Network,
            },
            Self::NodeTimeout { .. } => ErrorCategory::Network,
            Self::NodeAuth { .. } => ErrorCategory::Auth,
            Self::NodeRateLimit { .. } => ErrorCategory::RateLimit,
            Self::ToolError { .. } => ErrorCategory::Tool,
            Self::McpStartError { .. }
            | Self::McpNotConfigured { .. }
            | Self::McpProtocol { .. }
            | Self::McpTimeout { .. } => ErrorCategory::Tool,
            Self::NodeRuntime { .. }
            | Self::BatchItemsNotList { .. }
            | Self::BatchFailed { .. }
            | Self::ConfigError { .. }
            | Self::IoError(_)
            | Self::JsonError(_) => ErrorCategory::Runtime,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Check if error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NodeTimeout { .. }
                | Self::NodeRateLimit { .. }
                | Self::HttpStatus { .. }
                | Self::McpTimeout { .. }
        )
    }

    /// Shortcut for a node-scoped runtime error
    pub fn node_runtime(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NodeRuntime {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Shortcut for an internal invariant violation
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }
}

impl FixSuggestion for PflowError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            PflowError::ParseError { .. } => {
                Some("Check JSON syntax, or markdown section structure for .pflow.md")
            }
            PflowError::WorkflowNotFound { .. } => Some("Check the file path exists"),
            PflowError::IrSchema { .. } => {
                Some("Check the document against schemas/pflow-ir.schema.json")
            }
            PflowError::IrVersion { .. } => Some("Declare \"ir_version\": \"0.1.0\" at top level"),
            PflowError::IrReference { .. } => {
                Some("Edge endpoints and template roots must name declared inputs or nodes")
            }
            PflowError::IrCycle { .. } => Some("Remove circular edges from your workflow"),
            PflowError::RegistryMiss { .. } => {
                Some("Run `pflow nodes list` to see available node types")
            }
            PflowError::RegistryCache { .. } => {
                Some("Delete ~/.pflow/registry-cache.json and retry")
            }
            PflowError::CompileError { .. } => Some("Check node params and edge definitions"),
            PflowError::OutputSourceUnknown { .. } => {
                Some("Output sources must reference a declared node's namespace")
            }
            PflowError::TemplateUnresolved { .. } => {
                Some("Reference a declared input or a node output as node_id.key")
            }
            PflowError::TemplateTypeMismatch { .. } => {
                Some("Pass binary values through single-reference templates only")
            }
            PflowError::InvalidTraversal { .. } => {
                Some("Check the path - accessing field on non-map value")
            }
            PflowError::NodeRuntime { .. } => Some("Check node params and upstream outputs"),
            PflowError::NodeTimeout { .. } => Some("Increase the node timeout or check the host"),
            PflowError::NodeAuth { .. } => {
                Some("Check the relevant API key or credential env var is set")
            }
            PflowError::NodeRateLimit { .. } => Some("Back off and retry, or reduce concurrency"),
            PflowError::HttpStatus { .. } => Some("Check the URL and the remote service status"),
            PflowError::BatchItemsNotList { .. } => {
                Some("Batch items must be a template resolving to a list")
            }
            PflowError::BatchFailed { .. } => {
                Some("Set fail_fast: false to capture per-item errors")
            }
            PflowError::McpStartError { .. } => {
                Some("Check the command and args in mcp-servers.json")
            }
            PflowError::McpNotConfigured { .. } => {
                Some("Add the server with `pflow mcp add` and re-sync")
            }
            PflowError::McpProtocol { .. } => Some("Check MCP server compatibility"),
            PflowError::ToolError { .. } => {
                Some("Check tool arguments against the tool's input schema")
            }
            PflowError::McpTimeout { .. } => {
                Some("MCP server is slow or unresponsive; check server health")
            }
            PflowError::ConfigError { .. } => Some("Check ~/.pflow/settings.json syntax"),
            PflowError::WorkflowNotInLibrary { .. } => {
                Some("Run `pflow workflows list` to see saved workflows")
            }
            PflowError::IoError(_) => Some("Check file path and permissions"),
            PflowError::JsonError(_) => Some("Check JSON syntax"),
            PflowError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            PflowError::Cancelled => None,
            PflowError::Internal { .. } => Some("This is a bug; please report it"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_extraction() {
        let err = PflowError::McpNotConfigured {
            name: "filesystem".to_string(),
        };
        assert_eq!(err.code(), "PFLOW-061");
    }

    #[test]
    fn test_error_display_includes_code() {
        let err = PflowError::NodeRuntime {
            node_id: "fetch".to_string(),
            reason: "timeout".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("[PFLOW-040]"));
        assert!(msg.contains("fetch"));
    }

    #[test]
    fn test_template_unresolved_lists_available() {
        let err = PflowError::TemplateUnresolved {
            template: "${repoo}".to_string(),
            variable: "repoo".to_string(),
            available_variables: vec!["repo".to_string()],
            available_fields: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("repoo"));
        assert!(msg.contains("repo"));
    }

    #[test]
    fn test_registry_miss_includes_suggestions() {
        let err = PflowError::RegistryMiss {
            type_id: "htpp".to_string(),
            suggestions: vec!["http".to_string()],
        };
        assert!(err.to_string().contains("did you mean: http?"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            PflowError::IrSchema {
                pointer: "/nodes".into(),
                message: "x".into()
            }
            .category(),
            ErrorCategory::Schema
        );
        assert_eq!(
            PflowError::TemplateUnresolved {
                template: "${x}".into(),
                variable: "x".into(),
                available_variables: vec![],
                available_fields: None,
            }
            .category(),
            ErrorCategory::Template
        );
        assert_eq!(
            PflowError::HttpStatus {
                status: 401,
                body: String::new()
            }
            .category(),
            ErrorCategory::Auth
        );
        assert_eq!(
            PflowError::HttpStatus {
                status: 429,
                body: String::new()
            }
            .category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            PflowError::ToolError {
                server: "fs".into(),
                tool: "read".into(),
                message: "denied".into(),
                data: None,
            }
            .category(),
            ErrorCategory::Tool
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(PflowError::NodeTimeout {
            node_id: "x".into(),
            timeout_ms: 1000
        }
        .is_recoverable());
        assert!(!PflowError::IrCycle {
            cycle: "a → a".into()
        }
        .is_recoverable());
    }
}
