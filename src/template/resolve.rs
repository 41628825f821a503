//! Single-pass template resolution with Cow-style fast paths
//!
//! True single-pass: segments between matches are copied once, replacements
//! are computed by reference traversal and only allocated at the final
//! conversion.

use crate::error::{PflowError, Result};
use crate::store::{parse_path, PathSeg, Value};

use super::scope::TemplateScope;
use super::VAR_RE;

/// Check whether a template is exactly one `${...}` reference
pub fn is_single_reference(template: &str) -> bool {
    match VAR_RE.find(template) {
        Some(m) => m.start() == 0 && m.end() == template.len(),
        None => false,
    }
}

/// Extract all references from a template as `(root, full_path)` pairs.
///
/// Used by validation-only passes before anything executes.
pub fn extract_refs(template: &str) -> Vec<(String, String)> {
    VAR_RE
        .captures_iter(template)
        .map(|cap| {
            let full_path = cap[1].to_string();
            let root = full_path
                .split(['.', '['])
                .next()
                .unwrap_or(&full_path)
                .to_string();
            (root, full_path)
        })
        .collect()
}

/// Resolve one reference path against the scope
fn resolve_ref(template: &str, path_str: &str, scope: &TemplateScope) -> Result<Value> {
    let segs = parse_path(path_str);
    let (root_seg, rest) = segs
        .split_first()
        .ok_or_else(|| PflowError::internal(format!("empty template path in '{template}'")))?;
    let root = match root_seg {
        PathSeg::Key(k) => k.as_str(),
        PathSeg::Index(_) => {
            return Err(PflowError::TemplateTypeMismatch {
                template: template.to_string(),
                detail: "reference cannot start with an index".to_string(),
            })
        }
    };

    let base = scope
        .lookup(root)
        .ok_or_else(|| PflowError::TemplateUnresolved {
            template: template.to_string(),
            variable: path_str.to_string(),
            available_variables: scope.available_variables(),
            available_fields: None,
        })?;

    if rest.is_empty() {
        return Ok(base);
    }

    // Walk the remaining path by reference; produce a precise error at the
    // first missing segment.
    let mut current = &base;
    for (i, seg) in rest.iter().enumerate() {
        let next = match (seg, current) {
            (PathSeg::Key(k), Value::Map(m)) => m.get(k.as_str()),
            (PathSeg::Index(idx), Value::List(items)) => items.get(*idx),
            (PathSeg::Key(k), Value::List(items)) => {
                k.parse::<usize>().ok().and_then(|idx| items.get(idx))
            }
            _ => {
                return Err(PflowError::InvalidTraversal {
                    segment: seg.to_string(),
                    value_type: current.type_name().to_string(),
                    full_path: path_str.to_string(),
                })
            }
        };
        match next {
            Some(v) => current = v,
            None => {
                // Root resolved but a sub-path did not: report the fields
                // that exist at the deepest resolved map.
                let available_fields = current
                    .as_map()
                    .map(|m| m.keys().cloned().collect::<Vec<_>>());
                let resolved: Vec<String> = std::iter::once(root.to_string())
                    .chain(rest[..i].iter().map(|s| s.to_string()))
                    .collect();
                return Err(PflowError::TemplateUnresolved {
                    template: template.to_string(),
                    variable: format!("{}.{}", resolved.join("."), seg),
                    available_variables: scope.available_variables(),
                    available_fields,
                });
            }
        }
    }

    Ok(current.clone())
}

/// Resolve a template string, preserving native types for single references.
///
/// `"${fetch.response}"` yields the raw value (bytes stay bytes); any
/// surrounding text forces stringification.
pub fn resolve_value(template: &str, scope: &TemplateScope) -> Result<Value> {
    if !template.contains("${") {
        return Ok(Value::Str(template.to_string()));
    }

    if is_single_reference(template) {
        let path = &VAR_RE.captures(template).expect("matched above")[1];
        return resolve_ref(template, path, scope);
    }

    resolve_string(template, scope).map(Value::Str)
}

/// Resolve a template with surrounding text or multiple references into a
/// string. Bytes anywhere in a substitution fail fast.
pub fn resolve_string(template: &str, scope: &TemplateScope) -> Result<String> {
    let mut result = String::with_capacity(template.len() + 64);
    let mut last_end = 0;

    for cap in VAR_RE.captures_iter(template) {
        let m = cap.get(0).expect("capture group 0 always present");
        let path = &cap[1];

        result.push_str(&template[last_end..m.start()]);

        let value = resolve_ref(template, path, scope)?;
        let embedded =
            value
                .embed_string()
                .ok_or_else(|| PflowError::TemplateTypeMismatch {
                    template: template.to_string(),
                    detail: format!(
                        "'{path}' is {} and cannot be embedded in a string template",
                        value.type_name()
                    ),
                })?;
        result.push_str(&embedded);

        last_end = m.end();
    }

    result.push_str(&template[last_end..]);
    Ok(result)
}

/// Recursively resolve templates inside a nested value.
///
/// String leaves go through [`resolve_value`] (so a single-reference string
/// leaf may change type); other leaves pass through unchanged.
pub fn resolve_nested(value: &Value, scope: &TemplateScope) -> Result<Value> {
    match value {
        Value::Str(s) => resolve_value(s, scope),
        Value::List(items) => {
            let resolved = items
                .iter()
                .map(|v| resolve_nested(v, scope))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(resolved))
        }
        Value::Map(m) => {
            let resolved = m
                .iter()
                .map(|(k, v)| Ok((k.clone(), resolve_nested(v, scope)?)))
                .collect::<Result<_>>()?;
            Ok(Value::Map(resolved))
        }
        other => Ok(other.clone()),
    }
}
