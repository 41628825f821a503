//! Workflow IR - canonical JSON workflow document
//!
//! Two-source loader: the canonical JSON form and the markdown authoring
//! form (`.pflow.md`) both land here. Validation order is fixed: schema
//! first, then references, then cycles - reference errors always see a
//! well-typed IR.

pub mod markdown;
pub mod schema;

mod validate;

pub use validate::{validate_references, validate_templates};

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PflowError, Result};

/// Current IR version
pub const IR_VERSION: &str = "0.1.0";

/// Action label used when an edge declares none
pub const DEFAULT_ACTION: &str = "default";

/// Canonical workflow document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowIr {
    pub ir_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub typical_use_cases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u64>,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputSpec>,
}

/// One node definition.
///
/// Unknown fields inside `params` are the forward-compatibility surface;
/// the schema does not constrain them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDef {
    pub id: String,
    #[serde(rename = "type")]
    pub type_id: String,
    /// 10-200 char human description, required for generated workflows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// A directed edge. Absent `action` means `"default"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    DEFAULT_ACTION.to_string()
}

/// Declared external parameter of the workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InputSpec {
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false) && self.default.is_none()
    }
}

/// Declared workflow output, rendered from a template source at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: String,
}

impl WorkflowIr {
    /// Load canonical IR from a JSON string: schema validation, serde parse,
    /// reference validation, cycle detection - in that order.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: serde_json::Value =
            serde_json::from_str(json).map_err(|e| PflowError::ParseError {
                details: e.to_string(),
            })?;
        Self::from_value(raw)
    }

    /// Load canonical IR from a parsed JSON value
    pub fn from_value(raw: serde_json::Value) -> Result<Self> {
        schema::validate(&raw)?;

        let ir: WorkflowIr =
            serde_json::from_value(raw).map_err(|e| PflowError::ParseError {
                details: e.to_string(),
            })?;

        if ir.ir_version != IR_VERSION {
            return Err(PflowError::IrVersion {
                version: ir.ir_version.clone(),
            });
        }

        validate::validate_references(&ir)?;
        validate::detect_cycles(&ir)?;
        Ok(ir)
    }

    /// Load a draft document: missing `edges` and `ir_version` are
    /// auto-normalized before full validation.
    pub fn from_draft(mut raw: serde_json::Value) -> Result<Self> {
        if let Some(obj) = raw.as_object_mut() {
            obj.entry("ir_version")
                .or_insert_with(|| serde_json::Value::String(IR_VERSION.to_string()));
            obj.entry("edges")
                .or_insert_with(|| serde_json::Value::Array(vec![]));
        }
        Self::from_value(raw)
    }

    /// Load a workflow from disk, dispatching on extension:
    /// `.pflow.md` goes through the markdown front-end, everything else is
    /// parsed as canonical JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|_| PflowError::WorkflowNotFound {
            path: path.display().to_string(),
        })?;
        if path.to_string_lossy().ends_with(".pflow.md") {
            markdown::parse(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// Serialize back to pretty JSON (byte-identical round-trip modulo key order)
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    /// Display name: metadata name or a fallback
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }
}
