//! IR Schema Validator
//!
//! Validates canonical IR documents against the embedded JSON Schema before
//! serde parsing. Strictness lives in the schema itself: unknown top-level
//! keys are rejected (`additionalProperties: false`), unknown fields inside
//! nodes/edges/inputs/outputs are permitted for forward compatibility.

use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::Value;

use crate::error::{PflowError, Result};

/// Embedded schema JSON (compiled at build time)
const SCHEMA_JSON: &str = include_str!("../../schemas/pflow-ir.schema.json");

/// Global schema validator instance (lazy initialization)
static VALIDATOR: OnceLock<std::result::Result<Validator, String>> = OnceLock::new();

fn validator() -> Result<&'static Validator> {
    let result = VALIDATOR.get_or_init(|| {
        let schema: Value = serde_json::from_str(SCHEMA_JSON)
            .map_err(|e| format!("failed to parse embedded schema: {e}"))?;
        Validator::new(&schema).map_err(|e| format!("failed to compile schema: {e}"))
    });
    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(PflowError::internal(e.clone())),
    }
}

/// Validate a raw IR document against the schema.
///
/// Returns the first violation as [`PflowError::IrSchema`] with a JSON
/// pointer to the offending field.
pub fn validate(raw: &Value) -> Result<()> {
    let validator = validator()?;

    if let Some(error) = validator.iter_errors(raw).next() {
        let pointer = error.instance_path.to_string();
        let pointer = if pointer.is_empty() {
            "/".to_string()
        } else {
            pointer
        };
        return Err(PflowError::IrSchema {
            pointer,
            message: error.to_string(),
        });
    }
    Ok(())
}
