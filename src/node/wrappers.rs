//! Node wrappers - composed behavioral layers
//!
//! Every compiled node is wrapped in a fixed order, outermost first:
//! instrumented → batch (when configured) → template-aware → lifecycle.
//! Each wrapper holds the next as a field and forwards calls directly - no
//! attribute delegation, no inheritance, so cloning a context for per-run
//! isolation never recurses through hidden layers.
//!
//! Namespacing is the store view installed at context construction
//! ([`crate::store::shared::NamespacedStore`]): reads pass through, bare
//! writes land in `shared[node_id]`.
//!
//! The retry loop lives in the innermost lifecycle runner, wrapped around
//! `exec` only. Outer layers never catch exec errors on the retry path; the
//! instrumented layer records the final failure and re-raises.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{PflowError, Result};
use crate::llm::InterceptedClient;
use crate::store::{shared::NamespacedStore, SharedStore, Value, ValueMap};
use crate::template::resolve_nested;
use crate::template::resolve_value;
use crate::trace::{redact_value, TraceEvent};

use super::{BatchConfig, NodeBehavior, RetryPolicy, RunContext, ACTION_DEFAULT};

/// The single typed interface the wrapper chain composes over
#[async_trait]
pub trait NodeRunner: Send + Sync {
    async fn run(&self, ctx: &mut RunContext) -> Result<String>;
}

/// Assemble the full wrapper chain for one compiled node.
///
/// `raw_params` should no longer contain the `batch` key - that config is
/// wrapper concern, not node input.
pub fn wrap_node(
    behavior: Arc<dyn NodeBehavior>,
    raw_params: ValueMap,
    retry: RetryPolicy,
    batch: Option<BatchConfig>,
) -> Arc<dyn NodeRunner> {
    let raw_params = Arc::new(raw_params);
    let lifecycle = Arc::new(Lifecycle { behavior, retry });
    let template = Arc::new(TemplateAware {
        raw_params: Arc::clone(&raw_params),
        inner: lifecycle,
    });
    let mid: Arc<dyn NodeRunner> = match batch {
        Some(config) => Arc::new(Batch {
            config,
            inner: template,
        }),
        None => template,
    };
    Arc::new(Instrumented {
        raw_params,
        inner: mid,
    })
}

// ═══════════════════════════════════════════════════════════════
// LIFECYCLE - prep → retry(exec) → post
// ═══════════════════════════════════════════════════════════════

/// Innermost runner: drives the three-phase lifecycle with the retry loop
/// around exec. After exhaustion, `exec_fallback` gets the final error.
pub struct Lifecycle {
    pub behavior: Arc<dyn NodeBehavior>,
    pub retry: RetryPolicy,
}

#[async_trait]
impl NodeRunner for Lifecycle {
    async fn run(&self, ctx: &mut RunContext) -> Result<String> {
        let prep = self.behavior.prep(ctx).await?;

        let mut attempt = 0u32;
        let exec = loop {
            attempt += 1;
            ctx.attempts = attempt;
            match self.behavior.exec(ctx, prep.clone()).await {
                Ok(value) => break value,
                Err(error) if attempt < self.retry.max_attempts => {
                    ctx.services.trace.emit(TraceEvent::NodeRetried {
                        node_id: Arc::clone(&ctx.node_id),
                        attempt,
                        error: error.to_string(),
                    });
                    tracing::debug!(node = %ctx.node_id, attempt, %error, "retrying exec");
                    if !self.retry.wait.is_zero() {
                        tokio::time::sleep(self.retry.wait).await;
                    }
                }
                Err(error) => break self.behavior.exec_fallback(&prep, error)?,
            }
        };

        self.behavior.post(ctx, prep, exec).await
    }
}

// ═══════════════════════════════════════════════════════════════
// TEMPLATE-AWARE - resolve params just before prep
// ═══════════════════════════════════════════════════════════════

/// Resolves the node's raw params against the live store immediately before
/// the inner lifecycle runs. Single-reference params reach the node with
/// their native types.
pub struct TemplateAware {
    pub raw_params: Arc<ValueMap>,
    pub inner: Arc<dyn NodeRunner>,
}

#[async_trait]
impl NodeRunner for TemplateAware {
    async fn run(&self, ctx: &mut RunContext) -> Result<String> {
        let resolved = resolve_nested(&Value::Map((*self.raw_params).clone()), &ctx.scope)?;
        ctx.params = match resolved {
            Value::Map(m) => m,
            other => {
                return Err(PflowError::internal(format!(
                    "param resolution changed shape to {}",
                    other.type_name()
                )))
            }
        };
        self.inner.run(ctx).await
    }
}

// ═══════════════════════════════════════════════════════════════
// BATCH - fan out over a list with bounded concurrency
// ═══════════════════════════════════════════════════════════════

/// Fan-out wrapper. Resolves the items template, runs the inner chain once
/// per item with the `as` binding overlaid, and aggregates outputs into a
/// `results` list preserving input order regardless of completion order.
pub struct Batch {
    pub config: BatchConfig,
    pub inner: Arc<dyn NodeRunner>,
}

impl Batch {
    async fn run_item(
        inner: Arc<dyn NodeRunner>,
        base_node_id: Arc<str>,
        scope: crate::template::TemplateScope,
        services: super::ExecServices,
        var: String,
        item: Value,
    ) -> Result<Value> {
        // Each item writes into its own scratch store; only the aggregated
        // results list reaches the real namespace.
        let scratch = SharedStore::new();
        let mut item_ctx = RunContext {
            node_id: Arc::clone(&base_node_id),
            store: NamespacedStore::new(scratch.clone(), Arc::clone(&base_node_id)),
            scope: scope.with_binding(&var, item),
            params: ValueMap::new(),
            services,
            attempts: 0,
        };
        inner.run(&mut item_ctx).await?;
        Ok(match scratch.namespace(&base_node_id) {
            Some(outputs) => Value::Map(outputs),
            None => Value::Null,
        })
    }
}

#[async_trait]
impl NodeRunner for Batch {
    async fn run(&self, ctx: &mut RunContext) -> Result<String> {
        let items = match resolve_value(&self.config.items, &ctx.scope)? {
            Value::List(items) => items,
            other => {
                return Err(PflowError::BatchItemsNotList {
                    node_id: ctx.node_id.to_string(),
                    actual: other.type_name().to_string(),
                })
            }
        };

        // Empty batch: the node completes once with an empty results list
        if items.is_empty() {
            ctx.store.set("results", Value::List(Vec::new()));
            return Ok(ACTION_DEFAULT.to_string());
        }

        let total = items.len();
        let mut slots: Vec<Option<Value>> = (0..total).map(|_| None).collect();
        let mut failures: Vec<(usize, PflowError)> = Vec::new();

        if self.config.parallel {
            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
            let mut join_set: JoinSet<(usize, Result<Value>)> = JoinSet::new();

            for (idx, item) in items.into_iter().enumerate() {
                let inner = Arc::clone(&self.inner);
                let node_id = Arc::clone(&ctx.node_id);
                let scope = ctx.scope.clone();
                let services = ctx.services.clone();
                let var = self.config.as_var.clone();
                let semaphore = Arc::clone(&semaphore);

                join_set.spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    let result =
                        Self::run_item(inner, node_id, scope, services, var, item).await;
                    (idx, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (idx, result) = joined
                    .map_err(|e| PflowError::internal(format!("batch worker panicked: {e}")))?;
                let success = result.is_ok();
                ctx.services.trace.emit(TraceEvent::BatchItemFinished {
                    node_id: Arc::clone(&ctx.node_id),
                    index: idx,
                    success,
                });
                match result {
                    Ok(value) => slots[idx] = Some(value),
                    Err(error) => {
                        failures.push((idx, error));
                        if self.config.fail_fast {
                            // Cancel pending work where possible
                            join_set.abort_all();
                            break;
                        }
                    }
                }
            }
        } else {
            for (idx, item) in items.into_iter().enumerate() {
                let result = Self::run_item(
                    Arc::clone(&self.inner),
                    Arc::clone(&ctx.node_id),
                    ctx.scope.clone(),
                    ctx.services.clone(),
                    self.config.as_var.clone(),
                    item,
                )
                .await;
                let success = result.is_ok();
                ctx.services.trace.emit(TraceEvent::BatchItemFinished {
                    node_id: Arc::clone(&ctx.node_id),
                    index: idx,
                    success,
                });
                match result {
                    Ok(value) => slots[idx] = Some(value),
                    Err(error) => {
                        failures.push((idx, error));
                        if self.config.fail_fast {
                            break;
                        }
                    }
                }
            }
        }

        if !failures.is_empty() && self.config.fail_fast {
            failures.sort_by_key(|(idx, _)| *idx);
            let indices: Vec<usize> = failures.iter().map(|(idx, _)| *idx).collect();
            let reason = failures[0].1.to_string();
            return Err(PflowError::BatchFailed {
                node_id: ctx.node_id.to_string(),
                failed: indices,
                reason,
            });
        }

        // fail_fast=false: failed slots carry the per-item error
        for (idx, error) in failures {
            let mut entry = ValueMap::new();
            entry.insert("error".to_string(), Value::Str(error.to_string()));
            slots[idx] = Some(Value::Map(entry));
        }

        let results: Vec<Value> = slots.into_iter().map(|s| s.unwrap_or(Value::Null)).collect();
        ctx.store.set("results", Value::List(results));
        Ok(ACTION_DEFAULT.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════
// INSTRUMENTED - observe, never alter
// ═══════════════════════════════════════════════════════════════

/// Outermost wrapper. Records start/end, input and output snapshots, the
/// action, and attempts; scopes the LLM interceptor to this run; wraps
/// failures with node identity and re-raises - it never swallows.
pub struct Instrumented {
    pub raw_params: Arc<ValueMap>,
    pub inner: Arc<dyn NodeRunner>,
}

#[async_trait]
impl NodeRunner for Instrumented {
    async fn run(&self, ctx: &mut RunContext) -> Result<String> {
        let start = Instant::now();
        let trace = ctx.services.trace.clone();

        trace.emit(TraceEvent::NodeStarted {
            node_id: Arc::clone(&ctx.node_id),
            inputs: redact_value(&Value::Map((*self.raw_params).clone())),
        });

        // Scoped interceptor install: removed on every exit path below
        let previous_llm = Arc::clone(&ctx.services.llm);
        ctx.services.llm = Arc::new(InterceptedClient::new(
            Arc::clone(&previous_llm),
            trace.clone(),
            Arc::clone(&ctx.node_id),
        ));

        let result = self.inner.run(ctx).await;
        ctx.services.llm = previous_llm;

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(action) => {
                let outputs = ctx
                    .store
                    .inner()
                    .namespace(&ctx.node_id)
                    .map(|m| redact_value(&Value::Map(m)))
                    .unwrap_or(serde_json::Value::Null);
                trace.emit(TraceEvent::NodeCompleted {
                    node_id: Arc::clone(&ctx.node_id),
                    outputs,
                    action: action.clone(),
                    attempts: ctx.attempts.max(1),
                    duration_ms,
                });
            }
            Err(error) => {
                trace.emit(TraceEvent::NodeFailed {
                    node_id: Arc::clone(&ctx.node_id),
                    error: error.to_string(),
                    category: error.category().to_string(),
                    attempts: ctx.attempts.max(1),
                    duration_ms,
                });
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ExecServices;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Echoes its `value` param into the namespace
    struct EchoBehavior;

    #[async_trait]
    impl NodeBehavior for EchoBehavior {
        async fn exec(&self, ctx: &RunContext, _prep: Value) -> Result<Value> {
            Ok(ctx.param("value").cloned().unwrap_or(Value::Null))
        }

        async fn post(&self, ctx: &RunContext, _prep: Value, exec: Value) -> Result<String> {
            ctx.store.set("value", exec);
            Ok(ACTION_DEFAULT.to_string())
        }
    }

    /// Fails the first `fail_times` exec attempts, then succeeds
    struct FlakyBehavior {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NodeBehavior for FlakyBehavior {
        async fn exec(&self, ctx: &RunContext, _prep: Value) -> Result<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(PflowError::NodeTimeout {
                    node_id: ctx.node_id.to_string(),
                    timeout_ms: 1,
                })
            } else {
                Ok(Value::Str("ok".into()))
            }
        }
    }

    fn raw_params(v: serde_json::Value) -> ValueMap {
        match Value::from(v) {
            Value::Map(m) => m,
            _ => panic!("params must be a map"),
        }
    }

    fn ctx_for(node_id: &str, shared: &SharedStore) -> RunContext {
        RunContext::new(Arc::from(node_id), shared.clone(), ExecServices::for_tests())
    }

    #[tokio::test]
    async fn template_layer_preserves_native_types() {
        let shared = SharedStore::new();
        shared.set("count", Value::Int(42));
        let runner = wrap_node(
            Arc::new(EchoBehavior),
            raw_params(json!({"value": "${count}"})),
            RetryPolicy::none(),
            None,
        );

        let mut ctx = ctx_for("echo", &shared);
        runner.run(&mut ctx).await.unwrap();

        assert_eq!(shared.namespace("echo").unwrap()["value"], Value::Int(42));
    }

    #[tokio::test]
    async fn retry_exhausts_then_fails() {
        let shared = SharedStore::new();
        let runner = wrap_node(
            Arc::new(FlakyBehavior {
                fail_times: 5,
                calls: AtomicU32::new(0),
            }),
            ValueMap::new(),
            RetryPolicy::new(3, Duration::ZERO),
            None,
        );

        let mut ctx = ctx_for("flaky", &shared);
        let err = runner.run(&mut ctx).await.unwrap_err();
        assert_eq!(ctx.attempts, 3);
        assert!(err.to_string().contains("PFLOW-041"));

        // Trace shows two retries and the final failure
        let events = ctx.services.trace.filter_node("flaky");
        let retries = events
            .iter()
            .filter(|e| matches!(e.kind, TraceEvent::NodeRetried { .. }))
            .count();
        assert_eq!(retries, 2);
        assert!(events
            .iter()
            .any(|e| matches!(e.kind, TraceEvent::NodeFailed { .. })));
    }

    #[tokio::test]
    async fn retry_succeeds_on_third_attempt() {
        let shared = SharedStore::new();
        let runner = wrap_node(
            Arc::new(FlakyBehavior {
                fail_times: 2,
                calls: AtomicU32::new(0),
            }),
            ValueMap::new(),
            RetryPolicy::new(3, Duration::ZERO),
            None,
        );

        let mut ctx = ctx_for("flaky", &shared);
        let action = runner.run(&mut ctx).await.unwrap();
        assert_eq!(action, ACTION_DEFAULT);
        assert_eq!(ctx.attempts, 3);
        assert_eq!(
            shared.namespace("flaky").unwrap()["result"],
            Value::Str("ok".into())
        );
    }

    #[tokio::test]
    async fn single_attempt_policy_runs_exactly_once() {
        let shared = SharedStore::new();
        let behavior = Arc::new(FlakyBehavior {
            fail_times: 1,
            calls: AtomicU32::new(0),
        });
        let runner = wrap_node(
            Arc::clone(&behavior) as Arc<dyn NodeBehavior>,
            ValueMap::new(),
            RetryPolicy::none(),
            None,
        );

        let mut ctx = ctx_for("once", &shared);
        assert!(runner.run(&mut ctx).await.is_err());
        assert_eq!(behavior.calls.load(Ordering::SeqCst), 1);
    }

    // ═══════════════════════════════════════════════════════════════
    // BATCH
    // ═══════════════════════════════════════════════════════════════

    fn batch_runner(shared: &SharedStore, parallel: bool, fail_fast: bool) -> Arc<dyn NodeRunner> {
        shared.set(
            "names",
            Value::from(json!(["a", "b", "c"])),
        );
        wrap_node(
            Arc::new(EchoBehavior),
            raw_params(json!({"value": "item=${name}"})),
            RetryPolicy::none(),
            Some(BatchConfig {
                items: "${names}".into(),
                as_var: "name".into(),
                parallel,
                max_concurrent: 5,
                fail_fast,
            }),
        )
    }

    #[tokio::test]
    async fn batch_sequential_preserves_order() {
        let shared = SharedStore::new();
        let runner = batch_runner(&shared, false, true);

        let mut ctx = ctx_for("greet", &shared);
        runner.run(&mut ctx).await.unwrap();

        let ns = shared.namespace("greet").unwrap();
        let results = ns["results"].as_list().unwrap();
        assert_eq!(results.len(), 3);
        for (i, expected) in ["item=a", "item=b", "item=c"].iter().enumerate() {
            assert_eq!(
                results[i].as_map().unwrap()["value"],
                Value::Str((*expected).into())
            );
        }
    }

    #[tokio::test]
    async fn batch_parallel_preserves_order() {
        let shared = SharedStore::new();
        let runner = batch_runner(&shared, true, true);

        let mut ctx = ctx_for("greet", &shared);
        runner.run(&mut ctx).await.unwrap();

        let ns = shared.namespace("greet").unwrap();
        let results = ns["results"].as_list().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_map().unwrap()["value"],
            Value::Str("item=a".into())
        );
        assert_eq!(
            results[2].as_map().unwrap()["value"],
            Value::Str("item=c".into())
        );
    }

    #[tokio::test]
    async fn batch_empty_items_yields_empty_results() {
        let shared = SharedStore::new();
        shared.set("names", Value::List(vec![]));
        let runner = wrap_node(
            Arc::new(EchoBehavior),
            raw_params(json!({"value": "${name}"})),
            RetryPolicy::none(),
            Some(BatchConfig {
                items: "${names}".into(),
                as_var: "name".into(),
                parallel: false,
                max_concurrent: 5,
                fail_fast: true,
            }),
        );

        let mut ctx = ctx_for("greet", &shared);
        let action = runner.run(&mut ctx).await.unwrap();
        assert_eq!(action, ACTION_DEFAULT);
        assert_eq!(
            shared.namespace("greet").unwrap()["results"],
            Value::List(vec![])
        );
    }

    #[tokio::test]
    async fn batch_non_list_items_is_error() {
        let shared = SharedStore::new();
        shared.set("names", Value::Str("not a list".into()));
        let runner = wrap_node(
            Arc::new(EchoBehavior),
            raw_params(json!({"value": "${name}"})),
            RetryPolicy::none(),
            Some(BatchConfig {
                items: "${names}".into(),
                as_var: "name".into(),
                parallel: false,
                max_concurrent: 5,
                fail_fast: true,
            }),
        );

        let mut ctx = ctx_for("greet", &shared);
        let err = runner.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("PFLOW-050"));
    }

    /// Fails on items equal to "bad"
    struct PickyBehavior;

    #[async_trait]
    impl NodeBehavior for PickyBehavior {
        async fn exec(&self, ctx: &RunContext, _prep: Value) -> Result<Value> {
            match ctx.param("value") {
                Some(Value::Str(s)) if s == "bad" => Err(PflowError::node_runtime(
                    ctx.node_id.as_ref(),
                    "rejected item",
                )),
                other => Ok(other.cloned().unwrap_or(Value::Null)),
            }
        }
    }

    fn picky_batch(shared: &SharedStore, fail_fast: bool) -> Arc<dyn NodeRunner> {
        shared.set("items", Value::from(json!(["ok1", "bad", "ok2"])));
        wrap_node(
            Arc::new(PickyBehavior),
            raw_params(json!({"value": "${it}"})),
            RetryPolicy::none(),
            Some(BatchConfig {
                items: "${items}".into(),
                as_var: "it".into(),
                parallel: false,
                max_concurrent: 5,
                fail_fast,
            }),
        )
    }

    #[tokio::test]
    async fn batch_fail_fast_reports_failed_index() {
        let shared = SharedStore::new();
        let runner = picky_batch(&shared, true);

        let mut ctx = ctx_for("picky", &shared);
        let err = runner.run(&mut ctx).await.unwrap_err();
        match err {
            PflowError::BatchFailed { failed, .. } => assert_eq!(failed, vec![1]),
            other => panic!("expected BatchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_capture_mode_embeds_item_errors() {
        let shared = SharedStore::new();
        let runner = picky_batch(&shared, false);

        let mut ctx = ctx_for("picky", &shared);
        runner.run(&mut ctx).await.unwrap();

        let ns = shared.namespace("picky").unwrap();
        let results = ns["results"].as_list().unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[1].as_map().unwrap().contains_key("error"));
        assert_eq!(
            results[2].as_map().unwrap()["result"],
            Value::Str("ok2".into())
        );
    }

    // ═══════════════════════════════════════════════════════════════
    // INSTRUMENTATION
    // ═══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn instrumented_records_start_and_completion() {
        let shared = SharedStore::new();
        shared.set("count", Value::Int(1));
        let runner = wrap_node(
            Arc::new(EchoBehavior),
            raw_params(json!({"value": "${count}"})),
            RetryPolicy::none(),
            None,
        );

        let mut ctx = ctx_for("echo", &shared);
        runner.run(&mut ctx).await.unwrap();

        let events = ctx.services.trace.filter_node("echo");
        assert!(matches!(events[0].kind, TraceEvent::NodeStarted { .. }));
        match &events.last().unwrap().kind {
            TraceEvent::NodeCompleted {
                action, attempts, ..
            } => {
                assert_eq!(action, ACTION_DEFAULT);
                assert_eq!(*attempts, 1);
            }
            other => panic!("expected NodeCompleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn instrumented_redacts_secret_params() {
        let shared = SharedStore::new();
        let runner = wrap_node(
            Arc::new(EchoBehavior),
            raw_params(json!({"value": "x", "api_key": "sk-secret"})),
            RetryPolicy::none(),
            None,
        );

        let mut ctx = ctx_for("echo", &shared);
        runner.run(&mut ctx).await.unwrap();

        let events = ctx.services.trace.filter_node("echo");
        match &events[0].kind {
            TraceEvent::NodeStarted { inputs, .. } => {
                assert_eq!(inputs["api_key"], serde_json::json!("<REDACTED>"));
            }
            other => panic!("expected NodeStarted, got {other:?}"),
        }
    }
}
