//! LLM node - complete a prompt through the configured client
//!
//! The scoped interceptor installed by the instrumented wrapper records the
//! prompt, response, model, and token usage into the trace; this node only
//! does the call.

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::LlmRequest;
use crate::node::{NodeBehavior, RunContext};
use crate::store::{Value, ValueMap};

#[derive(Default)]
pub struct LlmNode;

#[async_trait]
impl NodeBehavior for LlmNode {
    async fn exec(&self, ctx: &RunContext, _prep: Value) -> Result<Value> {
        let prompt = ctx.param_str("prompt")?.to_string();
        let model = ctx.param_str_opt("model").map(str::to_string);

        let response = ctx
            .services
            .llm
            .complete(LlmRequest { prompt, model })
            .await?;

        let mut outputs = ValueMap::new();
        outputs.insert("response".to_string(), Value::Str(response.text));
        outputs.insert("model".to_string(), Value::Str(response.model));
        Ok(Value::Map(outputs))
    }
}
