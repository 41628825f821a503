//! On-disk workflow library - `~/.pflow/workflows/<name>.json`
//!
//! Thin adapter over the canonical IR loader, consumed by the CLI and the
//! agent-facing serve tools.

use std::path::PathBuf;

use crate::config::PflowHome;
use crate::error::{PflowError, Result};
use crate::ir::WorkflowIr;

/// Summary of one saved workflow
#[derive(Debug, serde::Serialize)]
pub struct WorkflowInfo {
    pub name: String,
    pub description: Option<String>,
    pub node_count: usize,
    pub path: PathBuf,
}

fn workflow_path(home: &PflowHome, name: &str) -> PathBuf {
    home.workflows_dir().join(format!("{name}.json"))
}

/// List saved workflows, sorted by name
pub fn list(home: &PflowHome) -> Result<Vec<WorkflowInfo>> {
    let dir = home.workflows_dir();
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut infos = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "json") {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            match load(home, &name) {
                Ok(ir) => infos.push(WorkflowInfo {
                    description: ir.description.clone(),
                    node_count: ir.nodes.len(),
                    name,
                    path,
                }),
                Err(e) => {
                    tracing::warn!(workflow = %name, error = %e, "skipping unreadable workflow");
                }
            }
        }
    }
    infos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(infos)
}

/// Load a saved workflow by name
pub fn load(home: &PflowHome, name: &str) -> Result<WorkflowIr> {
    let path = workflow_path(home, name);
    if !path.exists() {
        return Err(PflowError::WorkflowNotInLibrary {
            name: name.to_string(),
        });
    }
    WorkflowIr::from_file(&path)
}

/// Save a workflow into the library under its metadata name (or the given
/// override). Returns the path written.
pub fn save(home: &PflowHome, ir: &WorkflowIr, name_override: Option<&str>) -> Result<PathBuf> {
    let name = name_override
        .map(str::to_string)
        .or_else(|| ir.name.clone())
        .ok_or_else(|| PflowError::ConfigError {
            reason: "workflow has no name; pass one explicitly".to_string(),
        })?;

    std::fs::create_dir_all(home.workflows_dir())?;
    let path = workflow_path(home, &name);
    std::fs::write(&path, ir.to_json_string()?)?;
    Ok(path)
}

/// Resolve a CLI workflow argument: an existing file path wins, otherwise
/// the library is consulted by name.
pub fn resolve_source(home: &PflowHome, source: &str) -> Result<WorkflowIr> {
    let path = std::path::Path::new(source);
    if path.exists() {
        return WorkflowIr::from_file(path);
    }
    load(home, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_ir(name: &str) -> WorkflowIr {
        WorkflowIr::from_value(json!({
            "ir_version": "0.1.0",
            "name": name,
            "description": "A sample",
            "nodes": [{"id": "a", "type": "shell", "params": {"command": "true"}}]
        }))
        .unwrap()
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let home = PflowHome::at(dir.path());

        let ir = sample_ir("demo");
        let path = save(&home, &ir, None).unwrap();
        assert!(path.ends_with("workflows/demo.json"));

        let loaded = load(&home, "demo").unwrap();
        assert_eq!(loaded, ir);
    }

    #[test]
    fn list_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        let home = PflowHome::at(dir.path());

        save(&home, &sample_ir("zeta"), None).unwrap();
        save(&home, &sample_ir("alpha"), None).unwrap();

        let infos = list(&home).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].name, "alpha");
        assert_eq!(infos[1].name, "zeta");
        assert_eq!(infos[0].node_count, 1);
    }

    #[test]
    fn missing_workflow_is_library_error() {
        let dir = TempDir::new().unwrap();
        let home = PflowHome::at(dir.path());
        let err = load(&home, "ghost").unwrap_err();
        assert_eq!(err.code(), "PFLOW-071");
    }

    #[test]
    fn resolve_source_prefers_file_path() {
        let dir = TempDir::new().unwrap();
        let home = PflowHome::at(dir.path());

        let file = dir.path().join("adhoc.json");
        std::fs::write(&file, sample_ir("adhoc").to_json_string().unwrap()).unwrap();

        let ir = resolve_source(&home, file.to_str().unwrap()).unwrap();
        assert_eq!(ir.name.as_deref(), Some("adhoc"));

        // Unknown path falls back to library lookup and fails cleanly
        assert!(resolve_source(&home, "ghost").is_err());
    }

    #[test]
    fn save_requires_a_name() {
        let dir = TempDir::new().unwrap();
        let home = PflowHome::at(dir.path());

        let mut ir = sample_ir("x");
        ir.name = None;
        assert!(save(&home, &ir, None).is_err());
        assert!(save(&home, &ir, Some("explicit")).is_ok());
    }
}
