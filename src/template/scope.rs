//! TemplateScope - lookup environment for template resolution
//!
//! Wraps the shared store plus an overlay map for batch item bindings.
//! Overlay keys shadow store keys, which is what lets `${name}` inside a
//! batch body refer to the current item.

use crate::store::{SharedStore, Value, ValueMap};

/// Lookup environment: shared store + optional overlay bindings
#[derive(Clone)]
pub struct TemplateScope {
    store: SharedStore,
    overlay: ValueMap,
}

impl TemplateScope {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            overlay: ValueMap::new(),
        }
    }

    /// Derive a scope with one extra binding (batch `as` variable)
    pub fn with_binding(&self, name: &str, value: Value) -> Self {
        let mut overlay = self.overlay.clone();
        overlay.insert(name.to_string(), value);
        Self {
            store: self.store.clone(),
            overlay,
        }
    }

    /// Look up a root variable: overlay first, then the store.
    ///
    /// System keys (`__`-prefixed) are invisible to templates.
    pub fn lookup(&self, root: &str) -> Option<Value> {
        if root.starts_with("__") {
            return None;
        }
        if let Some(v) = self.overlay.get(root) {
            return Some(v.clone());
        }
        self.store.get(root)
    }

    /// Variables available for error reporting: overlay bindings plus the
    /// store's flat visible keys.
    pub fn available_variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = self.overlay.keys().cloned().collect();
        vars.extend(self.store.visible_keys());
        vars.sort();
        vars.dedup();
        vars
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }
}
