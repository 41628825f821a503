//! pflow - declarative workflow engine for AI tasks
//!
//! Humans and AI agents describe data-processing pipelines in a portable,
//! declarative form; pflow executes them deterministically with templated
//! data flow, parallel fan-out, retries, tracing, and MCP tool servers as
//! first-class nodes.
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  ir/        IR schema, loader, markdown front-end            │
//! │  registry/  Node-type catalog with virtual MCP entries       │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  compiler/  IR → wrapped node graph (index table)            │
//! │  runtime/   Cooperative executor + execution report          │
//! │  node/      Behavior trait, wrapper chain, builtins          │
//! │  template/  ${var} resolution with type preservation         │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  store/     Shared store (Value variant incl. Bytes)         │
//! │  trace/     Structured per-run trace collector + writer      │
//! │  mcp/       Protocol, transports, discovery, serve mode      │
//! │  llm        LLM client interface + scoped interceptor        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ir`] | Canonical JSON IR + `.pflow.md` authoring form |
//! | [`registry`] | Node-type catalog, filtering, disk cache |
//! | [`template`] | `${var}` resolution, single-reference type preservation |
//! | [`node`] | prep/exec/post behaviors and the wrapper chain |
//! | [`compiler`] | Graph lowering, MCP virtual-type injection |
//! | [`runtime`] | Execution loop, error routing, report envelope |
//! | [`mcp`] | Tool servers: config, discovery, universal node, serve |
//! | [`trace`] | Per-run observability, redaction, trace files |
//! | [`store`] | Polymorphic shared store with per-node namespaces |
//! | [`error`] | Error codes, categories, fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod ir;
pub mod registry;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER
// ═══════════════════════════════════════════════════════════════
pub mod compiler;
pub mod node;
pub mod runtime;
pub mod template;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER
// ═══════════════════════════════════════════════════════════════
pub mod llm;
pub mod mcp;
pub mod store;
pub mod trace;
pub mod workflows;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

pub use error::{ErrorCategory, FixSuggestion, PflowError, Result};

pub use config::{PflowHome, Settings};

pub use ir::{EdgeDef, InputSpec, NodeDef, OutputSpec, WorkflowIr, IR_VERSION};

pub use compiler::{compile, CompiledFlow, CompiledNode};

pub use runtime::{
    run_workflow, validate_workflow, ExecutionReport, Executor, NodeState, NodeStatus, RunOptions,
};

pub use registry::{FilterSettings, NodeEntry, NodeInterface, Registry};

pub use store::{SharedStore, Value, ValueMap};

pub use template::{resolve_nested, resolve_string, resolve_value, TemplateScope};

pub use trace::{generate_run_id, list_traces, TraceCollector, TraceEvent, TraceWriter};

pub use mcp::{McpRuntime, McpServersFile, ServerDef};

pub use llm::{LlmClient, LlmRequest, LlmResponse, ScriptedClient};
