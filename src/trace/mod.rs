//! Trace Collector - structured per-run observability
//!
//! Collection is separate from program logs: a thread-safe, append-only
//! event list (monotonic ids, ms-since-start timestamps) written as a
//! single JSON document at the end of the run. Always on for workflow
//! execution unless explicitly disabled.
//!
//! Redaction happens at emit time, before anything reaches the collector:
//! binary values become `<binary data: N bytes>` and secret-like keys
//! become `<REDACTED>`.

mod redact;
mod writer;

pub use redact::{redact_json, redact_value};
pub use writer::{list_traces, TraceInfo, TraceWriter};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::llm::TokenUsage;

/// Single event in the workflow execution trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since workflow start (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    #[serde(flatten)]
    pub kind: TraceEvent,
}

/// All trace event types.
///
/// Uses Arc<str> for node_id fields to enable zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    // ═══════════════════════════════════════════
    // WORKFLOW LEVEL
    // ═══════════════════════════════════════════
    WorkflowStarted {
        name: String,
        run_id: String,
        node_count: usize,
        pflow_version: String,
    },
    WorkflowCompleted {
        outputs: serde_json::Value,
        total_duration_ms: u64,
    },
    WorkflowFailed {
        error: String,
        failed_node: Option<Arc<str>>,
    },

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    NodeStarted {
        node_id: Arc<str>,
        /// Redacted snapshot of the node's resolved inputs
        inputs: serde_json::Value,
    },
    NodeCompleted {
        node_id: Arc<str>,
        /// Redacted snapshot of the node's namespace after post
        outputs: serde_json::Value,
        action: String,
        attempts: u32,
        duration_ms: u64,
    },
    NodeFailed {
        node_id: Arc<str>,
        error: String,
        category: String,
        attempts: u32,
        duration_ms: u64,
    },
    NodeRetried {
        node_id: Arc<str>,
        attempt: u32,
        error: String,
    },
    BatchItemFinished {
        node_id: Arc<str>,
        index: usize,
        success: bool,
    },

    // ═══════════════════════════════════════════
    // EXTERNAL CALLS
    // ═══════════════════════════════════════════
    LlmCall {
        node_id: Arc<str>,
        prompt: String,
        response: String,
        model: String,
        usage: TokenUsage,
    },
    McpCall {
        node_id: Arc<str>,
        server: String,
        tool: String,
        /// Redacted tool arguments
        arguments: serde_json::Value,
        duration_ms: u64,
        is_error: bool,
    },
    CacheHit {
        scope: String,
        detail: String,
    },
}

impl TraceEvent {
    /// Extract node_id if event is node-related
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeRetried { node_id, .. }
            | Self::BatchItemFinished { node_id, .. }
            | Self::LlmCall { node_id, .. }
            | Self::McpCall { node_id, .. } => Some(node_id),
            Self::WorkflowStarted { .. }
            | Self::WorkflowCompleted { .. }
            | Self::WorkflowFailed { .. }
            | Self::CacheHit { .. } => None,
        }
    }
}

/// Thread-safe, append-only trace collector
#[derive(Clone)]
pub struct TraceCollector {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
    enabled: bool,
}

impl TraceCollector {
    /// Create a new collector (call at workflow start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
            enabled: true,
        }
    }

    /// A collector that drops everything (`--no-trace`)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: TraceEvent) -> u64 {
        if !self.enabled {
            return 0;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };
        self.events.write().push(event);
        id
    }

    /// Get all events (cloned - use `with_events` for zero-copy access)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback.
    ///
    /// Holds the read lock for the duration of the callback - keep it short.
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    /// Filter events by node ID
    pub fn filter_node(&self, node_id: &str) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.node_id() == Some(node_id))
                .cloned()
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TraceCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TraceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceCollector")
            .field("len", &self.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Generate a unique run ID.
///
/// Format: `YYYY-MM-DDTHH-MM-SS-XXXXXXXX` where the suffix comes from a v4
/// UUID, so ids are filesystem-safe and sortable by start time.
pub fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    let timestamp = now.format("%Y-%m-%dT%H-%M-%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", timestamp, &suffix[..8])
}
