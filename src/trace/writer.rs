//! Trace file writer
//!
//! Writes the collected events plus the per-node execution summary as a
//! single JSON document at a deterministic path:
//! `<debug-dir>/workflow-trace-<name>-<timestamp>.json`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{PflowError, Result};

use super::TraceCollector;

/// Writes one trace document per run
pub struct TraceWriter {
    debug_dir: PathBuf,
}

impl TraceWriter {
    pub fn new(debug_dir: impl Into<PathBuf>) -> Self {
        Self {
            debug_dir: debug_dir.into(),
        }
    }

    /// Write the trace document. Returns the path written.
    ///
    /// The workflow name is sanitized to alphanumerics plus `-`/`_` to keep
    /// the path traversal-safe regardless of what the IR declared.
    pub fn write(
        &self,
        workflow_name: &str,
        run_id: &str,
        collector: &TraceCollector,
        node_summary: serde_json::Value,
    ) -> Result<PathBuf> {
        if run_id.is_empty()
            || !run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == 'T')
        {
            return Err(PflowError::internal(format!(
                "invalid run id for trace path: {run_id}"
            )));
        }

        fs::create_dir_all(&self.debug_dir)?;

        let name = sanitize_name(workflow_name);
        let filename = format!("workflow-trace-{name}-{run_id}.json");
        let path = self.debug_dir.join(filename);

        let document = serde_json::json!({
            "workflow": workflow_name,
            "run_id": run_id,
            "written_at": chrono::Utc::now().to_rfc3339(),
            "nodes": node_summary,
            "events": collector.events(),
        });

        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &document)?;
        writer.flush()?;

        tracing::info!(path = %path.display(), "Wrote workflow trace");
        Ok(path)
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "workflow".to_string()
    } else {
        cleaned
    }
}

/// Information about a trace file on disk
#[derive(Debug)]
pub struct TraceInfo {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created: Option<std::time::SystemTime>,
}

/// List all trace files in a debug directory, newest first
pub fn list_traces(debug_dir: &Path) -> Result<Vec<TraceInfo>> {
    if !debug_dir.exists() {
        return Ok(vec![]);
    }

    let mut traces = Vec::new();
    for entry in fs::read_dir(debug_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_trace = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("workflow-trace-") && n.ends_with(".json"));
        if is_trace {
            let metadata = entry.metadata()?;
            traces.push(TraceInfo {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size_bytes: metadata.len(),
                created: metadata.created().ok(),
            });
        }
    }

    traces.sort_by(|a, b| b.created.cmp(&a.created));
    Ok(traces)
}
