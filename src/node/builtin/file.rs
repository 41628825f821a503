//! File nodes - read-file and write-file
//!
//! Content round-trips bytes exactly: a binary read stays `Bytes` in the
//! store, and a `Bytes` content param writes byte-identical output.

use async_trait::async_trait;

use crate::error::{PflowError, Result};
use crate::node::{NodeBehavior, RunContext};
use crate::store::{Value, ValueMap};

#[derive(Default)]
pub struct ReadFileNode;

#[async_trait]
impl NodeBehavior for ReadFileNode {
    async fn exec(&self, ctx: &RunContext, _prep: Value) -> Result<Value> {
        let path = ctx.param_str("path")?;
        let raw = tokio::fs::read(path).await.map_err(|e| {
            PflowError::node_runtime(ctx.node_id.as_ref(), format!("cannot read '{path}': {e}"))
        })?;
        let size = raw.len() as i64;

        let content = match String::from_utf8(raw) {
            Ok(text) => Value::Str(text),
            Err(raw) => Value::Bytes(bytes::Bytes::from(raw.into_bytes())),
        };

        let mut outputs = ValueMap::new();
        outputs.insert("content".to_string(), content);
        outputs.insert("size_bytes".to_string(), Value::Int(size));
        Ok(Value::Map(outputs))
    }
}

#[derive(Default)]
pub struct WriteFileNode;

#[async_trait]
impl NodeBehavior for WriteFileNode {
    async fn exec(&self, ctx: &RunContext, _prep: Value) -> Result<Value> {
        let path = ctx.param_str("path")?.to_string();
        let content = ctx.param("content").ok_or_else(|| {
            PflowError::node_runtime(ctx.node_id.as_ref(), "missing required param 'content'")
        })?;

        let data: Vec<u8> = match content {
            Value::Bytes(b) => b.to_vec(),
            Value::Str(s) => s.clone().into_bytes(),
            other => other.to_json().to_string().into_bytes(),
        };
        let bytes_written = data.len() as i64;

        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
        }
        tokio::fs::write(&path, data).await.map_err(|e| {
            PflowError::node_runtime(ctx.node_id.as_ref(), format!("cannot write '{path}': {e}"))
        })?;

        let mut outputs = ValueMap::new();
        outputs.insert("path".to_string(), Value::Str(path));
        outputs.insert("bytes_written".to_string(), Value::Int(bytes_written));
        Ok(Value::Map(outputs))
    }
}
