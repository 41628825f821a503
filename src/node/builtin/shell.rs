//! Shell node - run a command via `sh -c` with a timeout
//!
//! Binary stdin is piped directly into the child process; no temp files are
//! involved, so there is nothing to clean up afterwards.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{PflowError, Result};
use crate::node::{NodeBehavior, RunContext};
use crate::store::{Value, ValueMap};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct ShellNode;

#[async_trait]
impl NodeBehavior for ShellNode {
    async fn exec(&self, ctx: &RunContext, _prep: Value) -> Result<Value> {
        let command = ctx.param_str("command")?;
        let timeout = ctx
            .param("timeout_secs")
            .and_then(Value::as_int)
            .map(|s| Duration::from_secs(s.max(1) as u64))
            .unwrap_or(DEFAULT_TIMEOUT);
        let stdin_data: Option<Vec<u8>> = match ctx.param("stdin") {
            Some(Value::Bytes(b)) => Some(b.to_vec()),
            Some(other) => other.embed_string().map(String::into_bytes),
            None => None,
        };

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd.spawn().map_err(|e| {
            PflowError::node_runtime(ctx.node_id.as_ref(), format!("failed to spawn: {e}"))
        })?;

        if let Some(data) = stdin_data {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                PflowError::node_runtime(ctx.node_id.as_ref(), "stdin not available")
            })?;
            stdin.write_all(&data).await.map_err(|e| {
                PflowError::node_runtime(ctx.node_id.as_ref(), format!("stdin write failed: {e}"))
            })?;
            drop(stdin);
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| PflowError::NodeTimeout {
                node_id: ctx.node_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| {
                PflowError::node_runtime(ctx.node_id.as_ref(), format!("command failed: {e}"))
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(PflowError::node_runtime(
                ctx.node_id.as_ref(),
                format!("command exited with {exit_code}: {}", stderr.trim()),
            ));
        }

        let stdout = match String::from_utf8(output.stdout) {
            Ok(text) => Value::Str(text.trim_end().to_string()),
            Err(raw) => Value::Bytes(bytes::Bytes::from(raw.into_bytes())),
        };

        let mut outputs = ValueMap::new();
        outputs.insert("stdout".to_string(), stdout);
        outputs.insert("stderr".to_string(), Value::Str(stderr));
        outputs.insert("exit_code".to_string(), Value::Int(exit_code as i64));
        Ok(Value::Map(outputs))
    }
}
