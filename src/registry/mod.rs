//! Registry - in-process catalog of node types
//!
//! Maps node-type IDs to behavior factories and their declared interfaces.
//! Built-in entries ship with the binary; MCP virtual entries are injected
//! at discovery time (`file_path = "virtual://mcp"`) and legally share the
//! universal MCP implementation - disambiguation happens via injected
//! `__mcp_server__` / `__mcp_tool__` params at compile time.
//!
//! Filtering (allow/deny globs, test-nodes flag) is applied at load time,
//! not storage time, so the same cached catalog serves both agent
//! (`include_filtered = true`) and user consumers.

use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{PflowError, Result};
use crate::node::builtin::{builtin_entries, TEST_NODE_KEYS};
use crate::node::NodeBehavior;

/// Sentinel file path for tools synthesized from an external catalog
pub const VIRTUAL_MCP_PATH: &str = "virtual://mcp";

/// Factory building a fresh behavior instance per compiled node
pub type NodeFactory = Arc<dyn Fn() -> Arc<dyn NodeBehavior> + Send + Sync>;

/// One field of a node's declared interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceField {
    pub key: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub description: String,
    pub required: bool,
}

impl InterfaceField {
    pub fn required(key: &str, type_name: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            type_name: type_name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(key: &str, type_name: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(key, type_name, description)
        }
    }
}

/// A node type's declared interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeInterface {
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<InterfaceField>,
    #[serde(default)]
    pub params: Vec<InterfaceField>,
    #[serde(default)]
    pub outputs: Vec<InterfaceField>,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// One registry entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeEntry {
    pub key: String,
    pub class_name: String,
    pub module_path: String,
    pub file_path: String,
    pub interface: NodeInterface,
}

impl NodeEntry {
    pub fn is_virtual(&self) -> bool {
        self.file_path == VIRTUAL_MCP_PATH
    }
}

/// Node filtering configuration (from settings.json)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterSettings {
    /// When non-empty, only matching type ids are visible
    #[serde(default)]
    pub allow: Vec<String>,
    /// Matching type ids are hidden
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub test_nodes_enabled: bool,
}

impl FilterSettings {
    fn matches_any(patterns: &[String], key: &str) -> bool {
        patterns.iter().any(|p| {
            glob::Pattern::new(p)
                .map(|pattern| pattern.matches(key))
                .unwrap_or(false)
        })
    }

    /// Whether a type id survives filtering
    pub fn permits(&self, key: &str) -> bool {
        if !self.test_nodes_enabled && TEST_NODE_KEYS.contains(&key) {
            return false;
        }
        if !self.allow.is_empty() && !Self::matches_any(&self.allow, key) {
            return false;
        }
        !Self::matches_any(&self.deny, key)
    }
}

/// The in-process node catalog
pub struct Registry {
    entries: FxHashMap<String, NodeEntry>,
    factories: FxHashMap<String, NodeFactory>,
    /// Preserves catalog order for listings
    order: Vec<String>,
    filter: FilterSettings,
}

impl Registry {
    /// Build a registry with the built-in catalog and the given filter
    pub fn with_filter(filter: FilterSettings) -> Self {
        let mut registry = Self {
            entries: FxHashMap::default(),
            factories: FxHashMap::default(),
            order: Vec::new(),
            filter,
        };
        for (entry, factory) in builtin_entries() {
            registry.factories.insert(entry.key.clone(), factory);
            registry.order.push(entry.key.clone());
            registry.entries.insert(entry.key.clone(), entry);
        }
        registry
    }

    /// Built-ins with everything visible (tests, tooling)
    pub fn unfiltered() -> Self {
        Self::with_filter(FilterSettings {
            test_nodes_enabled: true,
            ..FilterSettings::default()
        })
    }

    /// Get an entry by type id, honoring filtering
    pub fn get(&self, type_id: &str) -> Option<&NodeEntry> {
        if !self.filter.permits(type_id) {
            return None;
        }
        self.entries.get(type_id)
    }

    /// Get an entry ignoring filters (agent consumers)
    pub fn get_unfiltered(&self, type_id: &str) -> Option<&NodeEntry> {
        self.entries.get(type_id)
    }

    /// Behavior factory for a type id
    pub fn factory(&self, type_id: &str) -> Option<NodeFactory> {
        self.factories.get(type_id).cloned()
    }

    /// The active catalog. `include_filtered` bypasses allow/deny and the
    /// test-nodes gate.
    pub fn load(&self, include_filtered: bool) -> Vec<&NodeEntry> {
        self.order
            .iter()
            .filter(|key| include_filtered || self.filter.permits(key))
            .filter_map(|key| self.entries.get(key))
            .collect()
    }

    /// Visible catalog
    pub fn list(&self) -> Vec<&NodeEntry> {
        self.load(false)
    }

    /// Case-insensitive substring search over keys and descriptions
    pub fn search(&self, query: &str) -> Vec<&NodeEntry> {
        let query = query.to_lowercase();
        self.list()
            .into_iter()
            .filter(|e| {
                e.key.to_lowercase().contains(&query)
                    || e.interface.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Inject a virtual tool entry (MCP discovery).
    ///
    /// Type ids are unique: re-registering a key replaces its entry, which
    /// is what a re-sync after a server change needs.
    pub fn register_virtual(&mut self, entry: NodeEntry) {
        debug_assert!(entry.is_virtual());
        if !self.entries.contains_key(&entry.key) {
            self.order.push(entry.key.clone());
        }
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Fuzzy suggestions for an unknown type id (REGISTRY_MISS support)
    pub fn suggest(&self, type_id: &str) -> Vec<String> {
        let mut scored: Vec<(usize, &str)> = self
            .entries
            .keys()
            .filter_map(|key| {
                let distance = edit_distance(type_id, key);
                let close_enough = distance <= 2
                    || key.contains(type_id)
                    || type_id.contains(key.as_str());
                close_enough.then_some((distance, key.as_str()))
            })
            .collect();
        scored.sort();
        scored.into_iter().take(3).map(|(_, k)| k.to_string()).collect()
    }

    // ═══════════════════════════════════════════════════════════════
    // DISK CACHE
    // ═══════════════════════════════════════════════════════════════

    /// Persist the full catalog (virtual entries included) as JSON
    pub fn save_cache(&self, path: &Path) -> Result<()> {
        let entries: Vec<&NodeEntry> = self
            .order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .collect();
        let doc = serde_json::json!({
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "entries": entries,
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }

    /// Merge cached virtual entries back in (built-ins stay authoritative)
    pub fn load_cache(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let content = std::fs::read_to_string(path)?;
        let doc: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| PflowError::RegistryCache {
                reason: format!("unreadable cache: {e}"),
            })?;
        let entries: Vec<NodeEntry> = serde_json::from_value(
            doc.get("entries").cloned().unwrap_or_default(),
        )
        .map_err(|e| PflowError::RegistryCache {
            reason: format!("malformed cache entries: {e}"),
        })?;

        let mut loaded = 0;
        for entry in entries.into_iter().filter(NodeEntry::is_virtual) {
            self.register_virtual(entry);
            loaded += 1;
        }
        Ok(loaded)
    }
}

/// Plain Levenshtein distance, small inputs only
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}
