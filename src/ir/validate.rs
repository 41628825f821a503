//! IR reference and cycle validation
//!
//! Runs after schema validation, so every document seen here is well-typed.
//! Cycle detection uses the standard three-color DFS: white unvisited, gray
//! in the current stack, black fully processed. A gray neighbor means a
//! cycle.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{PflowError, Result};
use crate::template::extract_refs;

use super::WorkflowIr;

/// Validate edge endpoints, node id uniqueness, template roots, and output
/// sources against the declared ids.
pub fn validate_references(ir: &WorkflowIr) -> Result<()> {
    let mut node_ids: FxHashSet<&str> = FxHashSet::default();
    for node in &ir.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(PflowError::IrReference {
                detail: format!("duplicate node id '{}'", node.id),
            });
        }
    }

    for edge in &ir.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(PflowError::IrReference {
                    detail: format!(
                        "edge {} → {} references unknown node '{}'",
                        edge.from, edge.to, endpoint
                    ),
                });
            }
        }
    }

    // Template roots in params and outputs must name a declared input, a
    // declared node, or the node's own batch binding.
    validate_templates(ir)?;

    Ok(())
}

/// Static template check with placeholder semantics (validation-only pass).
///
/// No node executes; every `${root}` in params and output sources must name
/// a declared input or a declared node id. Batch `as` bindings count as
/// declared for the owning node's params.
pub fn validate_templates(ir: &WorkflowIr) -> Result<()> {
    let mut declared: FxHashSet<String> = ir.inputs.keys().cloned().collect();
    declared.extend(ir.nodes.iter().map(|n| n.id.clone()));

    for node in &ir.nodes {
        // The batch binding name is in scope for this node only
        let batch_var = node
            .params
            .get("batch")
            .and_then(|b| b.get("as"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        for (param, value) in &node.params {
            check_value_refs(value, &declared, batch_var.as_deref(), || {
                format!("node '{}' param '{}'", node.id, param)
            })?;
        }
    }

    for (name, output) in &ir.outputs {
        for (root, _full_path) in extract_refs(&output.source) {
            // Output sources reference nodes (or inputs) that will exist in
            // the final store; anything else will never resolve.
            if !declared.contains(&root) {
                return Err(PflowError::OutputSourceUnknown {
                    output: name.clone(),
                    source_node: output.source.clone(),
                });
            }
        }
    }

    Ok(())
}

fn check_value_refs(
    value: &serde_json::Value,
    declared: &FxHashSet<String>,
    batch_var: Option<&str>,
    context: impl Fn() -> String + Copy,
) -> Result<()> {
    match value {
        serde_json::Value::String(s) => {
            for (root, full_path) in extract_refs(s) {
                let in_scope =
                    declared.contains(&root) || batch_var.is_some_and(|var| var == root);
                if !in_scope {
                    let mut available = sorted(declared);
                    if let Some(var) = batch_var {
                        available.push(var.to_string());
                        available.sort();
                    }
                    tracing::debug!(context = %context(), variable = %full_path, "unresolved template reference");
                    return Err(PflowError::TemplateUnresolved {
                        template: s.clone(),
                        variable: full_path,
                        available_variables: available,
                        available_fields: None,
                    });
                }
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for item in items {
                check_value_refs(item, declared, batch_var, context)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                check_value_refs(item, declared, batch_var, context)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn sorted(set: &FxHashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.iter().cloned().collect();
    v.sort();
    v
}

/// Detect cycles in the edge graph using DFS with three-color marking.
pub fn detect_cycles(ir: &WorkflowIr) -> Result<()> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for node in &ir.nodes {
        adjacency.entry(node.id.as_str()).or_default();
    }
    for edge in &ir.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut colors: FxHashMap<&str, Color> = adjacency
        .keys()
        .map(|id| (*id, Color::White))
        .collect();
    let mut stack: Vec<&str> = Vec::new();

    fn dfs<'a>(
        node: &'a str,
        adjacency: &FxHashMap<&'a str, Vec<&'a str>>,
        colors: &mut FxHashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> std::result::Result<(), String> {
        colors.insert(node, Color::Gray);
        stack.push(node);

        if let Some(neighbors) = adjacency.get(node) {
            for neighbor in neighbors {
                match colors.get(neighbor) {
                    Some(Color::Gray) => {
                        let cycle_start = stack
                            .iter()
                            .position(|x| x == neighbor)
                            .unwrap_or(0);
                        let cycle = stack[cycle_start..].join(" → ");
                        return Err(format!("{cycle} → {neighbor}"));
                    }
                    Some(Color::White) | None => {
                        dfs(neighbor, adjacency, colors, stack)?;
                    }
                    Some(Color::Black) => {}
                }
            }
        }

        stack.pop();
        colors.insert(node, Color::Black);
        Ok(())
    }

    for node in &ir.nodes {
        if colors.get(node.id.as_str()) == Some(&Color::White) {
            if let Err(cycle) = dfs(node.id.as_str(), &adjacency, &mut colors, &mut stack) {
                return Err(PflowError::IrCycle { cycle });
            }
        }
    }

    Ok(())
}
