//! Node model - behavior trait, retry policy, run context, wrappers
//!
//! A node is a unit of work with a three-phase lifecycle:
//! `prep(ctx) → exec(prep) → post(ctx, prep, exec) → action`. The `exec`
//! phase returns `Err` on failure - never an error sentinel - so the retry
//! framework engages.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`wrappers`] | Instrumented / Batch / TemplateAware layers + lifecycle retry |
//! | [`builtin`] | Built-in node behaviors (http, shell, file, llm, test nodes) |

pub mod builtin;
pub mod wrappers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{PflowError, Result};
use crate::llm::LlmClient;
use crate::store::{shared::NamespacedStore, SharedStore, Value, ValueMap};
use crate::template::TemplateScope;
use crate::trace::TraceCollector;

/// Action label returned when a node declares nothing special
pub const ACTION_DEFAULT: &str = "default";

/// Action label the executor routes to on node failure, when declared
pub const ACTION_ERROR: &str = "error";

/// Retry policy for a node's exec phase.
///
/// `max_attempts == 1` is the no-retry setting: exactly one attempt occurs.
/// Zero would mean no execution at all, so construction normalizes it away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            wait,
        }
    }

    /// Single attempt, no retry
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Batch fan-out configuration, parsed from a node's `batch` param
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Template expression resolving to a list
    pub items: String,
    /// Binding name for the item within inner templates
    pub as_var: String,
    pub parallel: bool,
    pub max_concurrent: usize,
    /// Default true: one failure fails the batch. False captures per-item
    /// errors in the result slots instead.
    pub fail_fast: bool,
}

impl BatchConfig {
    /// Extract a batch config from raw node params, if present
    pub fn from_params(node_id: &str, params: &serde_json::Map<String, serde_json::Value>) -> Result<Option<Self>> {
        let Some(batch) = params.get("batch") else {
            return Ok(None);
        };
        let obj = batch
            .as_object()
            .ok_or_else(|| PflowError::CompileError {
                reason: format!("node '{node_id}': batch config must be a map"),
            })?;
        let items = obj
            .get("items")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PflowError::CompileError {
                reason: format!("node '{node_id}': batch config requires a string 'items'"),
            })?
            .to_string();
        Ok(Some(Self {
            items,
            as_var: obj
                .get("as")
                .and_then(|v| v.as_str())
                .unwrap_or("item")
                .to_string(),
            parallel: obj.get("parallel").and_then(|v| v.as_bool()).unwrap_or(false),
            max_concurrent: obj
                .get("max_concurrent")
                .and_then(|v| v.as_u64())
                .map(|n| (n as usize).max(1))
                .unwrap_or(5),
            fail_fast: obj.get("fail_fast").and_then(|v| v.as_bool()).unwrap_or(true),
        }))
    }
}

/// Services shared across the execution, cloned into each run context
#[derive(Clone)]
pub struct ExecServices {
    pub trace: TraceCollector,
    pub llm: Arc<dyn LlmClient>,
    pub mcp: Arc<crate::mcp::McpRuntime>,
    pub verbose: bool,
}

impl ExecServices {
    /// Minimal services for tests: fresh trace, no LLM, no MCP servers
    pub fn for_tests() -> Self {
        Self {
            trace: TraceCollector::new(),
            llm: Arc::new(crate::llm::NotConfigured),
            mcp: Arc::new(crate::mcp::McpRuntime::empty()),
            verbose: false,
        }
    }
}

/// Per-run state handed through the wrapper chain.
///
/// A fresh context is built for every node entry - parameters never cross
/// runs. The namespaced store view is installed here, which is how bare
/// writes from the inner node land in `shared[node_id]`.
pub struct RunContext {
    pub node_id: Arc<str>,
    pub store: NamespacedStore,
    pub scope: TemplateScope,
    /// Resolved params - filled by the template-aware wrapper before prep
    pub params: ValueMap,
    pub services: ExecServices,
    /// Exec attempts consumed (recorded by the lifecycle for the trace)
    pub attempts: u32,
}

impl RunContext {
    pub fn new(node_id: Arc<str>, shared: SharedStore, services: ExecServices) -> Self {
        Self {
            store: NamespacedStore::new(shared.clone(), Arc::clone(&node_id)),
            scope: TemplateScope::new(shared),
            node_id,
            params: ValueMap::new(),
            services,
            attempts: 0,
        }
    }

    /// Fork for one batch item: writes go to the scratch store, reads and
    /// template resolution see the real store with the item binding overlaid.
    pub fn fork_for_item(&self, scratch: SharedStore, var: &str, item: Value) -> Self {
        Self {
            node_id: Arc::clone(&self.node_id),
            store: NamespacedStore::new(scratch, Arc::clone(&self.node_id)),
            scope: self.scope.with_binding(var, item),
            params: ValueMap::new(),
            services: self.services.clone(),
            attempts: 0,
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Required string param, with a node-scoped error when missing
    pub fn param_str(&self, key: &str) -> Result<&str> {
        self.param(key)
            .and_then(Value::as_str)
            .ok_or_else(|| PflowError::node_runtime(
                self.node_id.as_ref(),
                format!("missing required string param '{key}'"),
            ))
    }

    pub fn param_str_opt(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }
}

/// A node's business logic: the three-phase lifecycle.
///
/// Implementations are stateless where possible; the compiler owns one
/// behavior instance per compiled node.
#[async_trait]
pub trait NodeBehavior: Send + Sync {
    /// Gather what exec needs from the resolved params and the store.
    ///
    /// Default: the resolved params as a map.
    async fn prep(&self, ctx: &RunContext) -> Result<Value> {
        Ok(Value::Map(ctx.params.clone()))
    }

    /// Do the work. Must return `Err` on failure so retries engage.
    async fn exec(&self, ctx: &RunContext, prep: Value) -> Result<Value>;

    /// Store outputs and pick the outgoing action.
    ///
    /// Default: a map result unpacks into the node namespace; anything else
    /// is stored under `result`. Returns the default action.
    async fn post(&self, ctx: &RunContext, _prep: Value, exec: Value) -> Result<String> {
        match exec {
            Value::Map(outputs) => {
                for (key, value) in outputs {
                    ctx.store.set(&key, value);
                }
            }
            other => ctx.store.set("result", other),
        }
        Ok(ACTION_DEFAULT.to_string())
    }

    /// Map the final error to a user-facing one after retries are exhausted.
    ///
    /// Default: propagate unchanged.
    fn exec_fallback(&self, _prep: &Value, error: PflowError) -> Result<Value> {
        Err(error)
    }

    /// Retry policy applied when the IR does not declare one
    fn default_retry(&self) -> RetryPolicy {
        RetryPolicy::none()
    }
}
