//! SharedStore - workflow state storage with DashMap
//!
//! Single map design with lock-free concurrent access. Three key kinds
//! coexist:
//! - flat values for workflow inputs and context
//! - per-node namespace maps holding node outputs
//! - `__`-prefixed system keys, invisible to user templates
//!
//! Created at execution start from workflow inputs, mutated by node `post`
//! phases (through a namespaced view), destroyed when execution terminates.

use std::sync::Arc;

use dashmap::DashMap;

use super::value::{parse_path, PathSeg, Value, ValueMap};

/// Thread-safe workflow store (lock-free)
///
/// Clone is shallow: clones share the same underlying map.
#[derive(Clone, Default)]
pub struct SharedStore {
    entries: Arc<DashMap<Arc<str>, Value>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from workflow inputs
    pub fn from_inputs(inputs: impl IntoIterator<Item = (String, Value)>) -> Self {
        let store = Self::new();
        for (k, v) in inputs {
            store.set(&k, v);
        }
        store
    }

    /// Set a flat key
    pub fn set(&self, key: &str, value: Value) {
        self.entries.insert(Arc::from(key), value);
    }

    /// Get a flat key (cloned)
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Write one output into a node's namespace
    pub fn set_namespaced(&self, node_id: &str, key: &str, value: Value) {
        let mut entry = self
            .entries
            .entry(Arc::from(node_id))
            .or_insert_with(|| Value::Map(ValueMap::new()));
        if let Value::Map(m) = entry.value_mut() {
            m.insert(key.to_string(), value);
        } else {
            // A flat value under this id is replaced by a namespace map
            let mut m = ValueMap::new();
            m.insert(key.to_string(), value);
            *entry.value_mut() = Value::Map(m);
        }
    }

    /// Get a node's whole namespace map
    pub fn namespace(&self, node_id: &str) -> Option<ValueMap> {
        match self.get(node_id) {
            Some(Value::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// Resolve a dotted/indexed path like `fetch.response` or `x.items[0]`
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let segs = parse_path(path);
        let (root, rest) = segs.split_first()?;
        let root_key = match root {
            PathSeg::Key(k) => k.as_str(),
            PathSeg::Index(_) => return None,
        };
        let base = self.get(root_key)?;
        if rest.is_empty() {
            return Some(base);
        }
        base.get_path(rest).cloned()
    }

    /// Flat keys visible to user templates: non-`__`, non-namespace.
    ///
    /// Used for `available_variables` in template errors and validation.
    pub fn visible_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|r| !r.key().starts_with("__") && !matches!(r.value(), Value::Map(_)))
            .map(|r| r.key().to_string())
            .collect();
        keys.sort();
        keys
    }

    /// All keys, namespaces included (for trace snapshots)
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|r| r.key().to_string()).collect();
        keys.sort();
        keys
    }

    /// Deep snapshot of the whole store as a value map
    pub fn snapshot(&self) -> ValueMap {
        self.entries
            .iter()
            .map(|r| (r.key().to_string(), r.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("len", &self.len())
            .finish()
    }
}

/// Namespaced write view handed to inner nodes.
///
/// Reads pass through to the full store; bare writes land in
/// `shared[node_id]`. This is how node outputs reach their namespace without
/// each node knowing its own id.
#[derive(Clone)]
pub struct NamespacedStore {
    store: SharedStore,
    node_id: Arc<str>,
}

impl NamespacedStore {
    pub fn new(store: SharedStore, node_id: Arc<str>) -> Self {
        Self { store, node_id }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Read-through to the full store
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        self.store.resolve_path(path)
    }

    /// Bare write, redirected into this node's namespace
    pub fn set(&self, key: &str, value: Value) {
        self.store.set_namespaced(&self.node_id, key, value);
    }

    /// Escape hatch for system keys (`__`-prefixed), written flat
    pub fn set_system(&self, key: &str, value: Value) {
        debug_assert!(key.starts_with("__"));
        self.store.set(key, value);
    }

    pub fn inner(&self) -> &SharedStore {
        &self.store
    }
}
