//! Template Resolution - `${var}` substitution with type preservation
//!
//! Syntax: `${name}`, `${node_id.key}`, `${node_id.key[0]}`,
//! `${node_id.key.subkey}`. Multiple references may appear in one string.
//!
//! The type-preservation rule: a template that is *exactly* one reference
//! resolves to the raw value of the expression, native type intact (int,
//! bool, bytes, list, map). A template with surrounding text or multiple
//! references resolves to a string; non-string substitutions embed as
//! compact JSON, and bytes in such a context are rejected (binary cannot be
//! embedded mid-string).
//!
//! Resolution order: workflow inputs, then named context keys, then per-node
//! namespaces - all through the shared store, with an optional overlay for
//! batch item bindings.

mod resolve;
mod scope;

pub use resolve::{extract_refs, is_single_reference, resolve_nested, resolve_string, resolve_value};
pub use scope::TemplateScope;

use regex::Regex;
use std::sync::LazyLock;

/// Pre-compiled regex for `${path}` references.
///
/// The closing `\}` terminates the variable, so `${node.key}.` matches only
/// `${node.key}` and trailing punctuation stays literal. Identifiers allow
/// kebab and underscore node ids; nested segments allow dotted keys and
/// `[index]` access.
pub(crate) static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z0-9_-]+|\[[0-9]+\])*)\}").unwrap()
});
