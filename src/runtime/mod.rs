//! Runtime - executor, execution report, and the run orchestration helper
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`executor`] | Cooperative graph walk with per-node error capture |
//! | [`report`] | Per-node status, durations, and the JSON repair envelope |

pub mod executor;
pub mod report;

pub use executor::{Executor, PLANNER_CACHE_KEY};
pub use report::{ExecutionReport, NodeError, NodeState, NodeStatus};

use std::sync::Arc;

use crate::compiler::compile;
use crate::config::{PflowHome, Settings};
use crate::error::Result;
use crate::ir::WorkflowIr;
use crate::llm::LlmClient;
use crate::mcp::{McpRuntime, McpServersFile};
use crate::registry::Registry;
use crate::store::ValueMap;
use crate::trace::{TraceCollector, TraceWriter};

/// Options for one workflow run
pub struct RunOptions {
    pub inputs: ValueMap,
    pub planner_cache: Option<serde_json::Value>,
    pub trace_enabled: bool,
    pub verbose: bool,
    pub llm: Option<Arc<dyn LlmClient>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            inputs: ValueMap::new(),
            planner_cache: None,
            trace_enabled: true,
            verbose: false,
            llm: None,
        }
    }
}

/// Compile and execute a workflow with the environment's registry and MCP
/// catalog, then write the trace file.
///
/// Trace writing, like all cleanup, is non-raising: a failure to persist
/// the trace is logged but never changes the run's outcome.
pub async fn run_workflow(
    ir: WorkflowIr,
    registry: &Registry,
    home: &PflowHome,
    settings: &Settings,
    options: RunOptions,
) -> Result<ExecutionReport> {
    let flow = compile(ir, registry)?;

    let mcp_config = McpServersFile::load(&home.mcp_servers_path())?;
    let mut executor = Executor::new(flow)
        .with_mcp(Arc::new(McpRuntime::new(mcp_config, options.verbose)))
        .with_verbose(options.verbose);
    if let Some(llm) = options.llm {
        executor = executor.with_llm(llm);
    }

    let trace = if options.trace_enabled && !settings.trace_disabled {
        TraceCollector::new()
    } else {
        TraceCollector::disabled()
    };

    let mut report = executor
        .execute(options.inputs, options.planner_cache, trace.clone())
        .await;

    if trace.is_enabled() {
        let writer = TraceWriter::new(home.debug_dir());
        match writer.write(
            executor.flow().ir.display_name(),
            &report.run_id,
            &trace,
            report.node_summary(),
        ) {
            Ok(path) => report.trace_path = Some(path),
            Err(e) => tracing::warn!(error = %e, "failed to write trace file"),
        }
    }

    Ok(report)
}

/// Validate a workflow without executing anything: compile against the
/// registry and run the static template pass (Scenario: validation-only).
pub fn validate_workflow(ir: WorkflowIr, registry: &Registry) -> Result<()> {
    crate::ir::validate_templates(&ir)?;
    compile(ir, registry).map(|_| ())
}
