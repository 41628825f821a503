//! Markdown authoring front-end - `.pflow.md` → canonical IR
//!
//! Line-based parser for the human-friendly authoring form:
//! - `# Title` → `name`
//! - first top-level paragraph → `description`
//! - `## Inputs` with `### input_name` subsections and bulleted fields
//! - `## Steps` with `### node_id` subsections; bullets populate params
//!   (with YAML scalar coercion), fenced code blocks carry long-form
//!   params (`prompt`, `shell command`, `yaml batch`, ...)
//! - `## Outputs` with `### output_name` subsections
//! - `## Edges` overrides the implicit sequential edges
//!
//! Both forms share the same downstream pipeline: the parsed document goes
//! through the draft loader, so schema, reference, and cycle validation all
//! apply.

use serde_json::{json, Map, Value};

use crate::error::{PflowError, Result};

use super::{WorkflowIr, DEFAULT_ACTION};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Inputs,
    Steps,
    Outputs,
    Edges,
}

/// Parse a `.pflow.md` document into canonical IR
pub fn parse(markdown: &str) -> Result<WorkflowIr> {
    let mut name: Option<String> = None;
    let mut description_lines: Vec<String> = Vec::new();

    let mut inputs = Map::new();
    let mut outputs = Map::new();
    let mut nodes: Vec<Value> = Vec::new();
    let mut step_order: Vec<String> = Vec::new();
    let mut explicit_edges: Vec<Value> = Vec::new();

    let mut section = Section::Preamble;
    let mut subsection: Option<String> = None;

    let mut lines = markdown.lines();
    while let Some(line) = lines.next() {
        let trimmed = line.trim_end();

        // Fenced code block: long-form param for the current step
        if let Some(info) = trimmed.strip_prefix("```") {
            let info = info.trim().to_string();
            let mut body = String::new();
            for inner in lines.by_ref() {
                if inner.trim_end() == "```" {
                    break;
                }
                body.push_str(inner);
                body.push('\n');
            }
            let body = body.trim_end().to_string();

            if section == Section::Steps {
                let step = subsection.as_ref().ok_or_else(|| PflowError::ParseError {
                    details: "fenced block outside a step subsection".to_string(),
                })?;
                apply_fenced_block(&mut nodes, step, &info, &body)?;
            }
            continue;
        }

        if let Some(title) = trimmed.strip_prefix("# ") {
            if name.is_none() {
                name = Some(title.trim().to_string());
            }
            continue;
        }

        if let Some(heading) = trimmed.strip_prefix("## ") {
            section = match heading.trim().to_lowercase().as_str() {
                "inputs" => Section::Inputs,
                "steps" => Section::Steps,
                "outputs" => Section::Outputs,
                "edges" => Section::Edges,
                _ => Section::Preamble,
            };
            subsection = None;
            continue;
        }

        if let Some(sub) = trimmed.strip_prefix("### ") {
            let sub = sub.trim().to_string();
            match section {
                Section::Steps => {
                    step_order.push(sub.clone());
                    nodes.push(json!({"id": sub, "params": {}}));
                }
                Section::Inputs => {
                    inputs.insert(sub.clone(), json!({"type": "string"}));
                }
                Section::Outputs => {
                    outputs.insert(sub.clone(), Value::Object(Map::new()));
                }
                _ => {}
            }
            subsection = Some(sub);
            continue;
        }

        if let Some(bullet) = trimmed.trim_start().strip_prefix("- ") {
            match section {
                Section::Inputs => {
                    if let (Some(input), Some((key, value))) =
                        (subsection.as_ref(), split_bullet(bullet))
                    {
                        if let Some(spec) = inputs.get_mut(input).and_then(Value::as_object_mut) {
                            spec.insert(key, coerce_scalar(&value));
                        }
                    }
                }
                Section::Steps => {
                    if let (Some(step), Some((key, value))) =
                        (subsection.as_ref(), split_bullet(bullet))
                    {
                        apply_step_bullet(&mut nodes, step, &key, &value);
                    }
                }
                Section::Outputs => {
                    if let (Some(output), Some((key, value))) =
                        (subsection.as_ref(), split_bullet(bullet))
                    {
                        if let Some(spec) = outputs.get_mut(output).and_then(Value::as_object_mut)
                        {
                            spec.insert(key, Value::String(value));
                        }
                    }
                }
                Section::Edges => {
                    explicit_edges.push(parse_edge_bullet(bullet)?);
                }
                Section::Preamble => {}
            }
            continue;
        }

        // Top-level paragraph before any section → description
        if section == Section::Preamble && !trimmed.is_empty() && !trimmed.starts_with('#') {
            description_lines.push(trimmed.to_string());
        }
    }

    if nodes.is_empty() {
        return Err(PflowError::ParseError {
            details: "no steps found (expected '## Steps' with '### node_id' subsections)"
                .to_string(),
        });
    }

    let edges = if explicit_edges.is_empty() {
        implicit_sequential_edges(&step_order)
    } else {
        explicit_edges
    };

    let mut doc = Map::new();
    if let Some(name) = name {
        doc.insert("name".to_string(), Value::String(name));
    }
    if !description_lines.is_empty() {
        doc.insert(
            "description".to_string(),
            Value::String(description_lines.join(" ")),
        );
    }
    doc.insert("nodes".to_string(), Value::Array(nodes));
    doc.insert("edges".to_string(), Value::Array(edges));
    if !inputs.is_empty() {
        doc.insert("inputs".to_string(), Value::Object(inputs));
    }
    if !outputs.is_empty() {
        doc.insert("outputs".to_string(), Value::Object(outputs));
    }

    WorkflowIr::from_draft(Value::Object(doc))
}

/// `- key: value` → (key, value)
fn split_bullet(bullet: &str) -> Option<(String, String)> {
    let (key, value) = bullet.split_once(':')?;
    Some((key.trim().to_string(), value.trim().to_string()))
}

/// Coerce a bullet scalar with YAML semantics: `true`/`false` → bool,
/// digits → int, quoted/other → string.
fn coerce_scalar(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => v,
        Ok(Value::String(s)) => Value::String(s),
        _ => Value::String(raw.to_string()),
    }
}

fn apply_step_bullet(nodes: &mut [Value], step: &str, key: &str, value: &str) {
    let Some(node) = nodes
        .iter_mut()
        .find(|n| n.get("id").and_then(Value::as_str) == Some(step))
    else {
        return;
    };
    if key == "type" {
        node.as_object_mut()
            .expect("node is always an object")
            .insert("type".to_string(), Value::String(value.to_string()));
    } else if key == "purpose" {
        node.as_object_mut()
            .expect("node is always an object")
            .insert("purpose".to_string(), Value::String(value.to_string()));
    } else if let Some(params) = node.get_mut("params").and_then(Value::as_object_mut) {
        params.insert(key.to_string(), coerce_scalar(value));
    }
}

/// Apply a fenced code block to the current step.
///
/// The info string's last word names the param; preceding words are a
/// format hint (`shell command` → param `command`, `markdown prompt` →
/// param `prompt`). A `yaml batch` block parses as the structured batch
/// config.
fn apply_fenced_block(nodes: &mut [Value], step: &str, info: &str, body: &str) -> Result<()> {
    let Some(node) = nodes
        .iter_mut()
        .find(|n| n.get("id").and_then(Value::as_str) == Some(step))
    else {
        return Ok(());
    };
    let Some(params) = node.get_mut("params").and_then(Value::as_object_mut) else {
        return Ok(());
    };

    let words: Vec<&str> = info.split_whitespace().collect();
    match words.as_slice() {
        ["yaml", "batch"] => {
            let batch: Value = serde_yaml::from_str(body)?;
            params.insert("batch".to_string(), batch);
        }
        [] => {
            // Bare fence defaults to the prompt param
            params.insert("prompt".to_string(), Value::String(body.to_string()));
        }
        words => {
            let param = words.last().expect("non-empty match arm");
            params.insert(param.to_string(), Value::String(body.to_string()));
        }
    }
    Ok(())
}

/// `- a -> b` or `- a -> b (action)`
fn parse_edge_bullet(bullet: &str) -> Result<Value> {
    let (from, rest) = bullet
        .split_once("->")
        .ok_or_else(|| PflowError::ParseError {
            details: format!("edge bullet must be 'from -> to', got '{bullet}'"),
        })?;
    let rest = rest.trim();
    let (to, action) = match rest.split_once('(') {
        Some((to, action)) => (
            to.trim(),
            action.trim_end_matches(')').trim().to_string(),
        ),
        None => (rest, DEFAULT_ACTION.to_string()),
    };
    Ok(json!({"from": from.trim(), "to": to, "action": action}))
}

fn implicit_sequential_edges(step_order: &[String]) -> Vec<Value> {
    step_order
        .windows(2)
        .map(|pair| json!({"from": pair[0], "to": pair[1], "action": DEFAULT_ACTION}))
        .collect()
}
