use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use graphrun_core::config::SandboxConfig;
use graphrun_core::error::{GraphError, Result};
use graphrun_core::traits::CodeExecutor;

/// Runs custom tool code in a child process.
///
/// The configured interpreter is started with an empty environment and
/// receives `{ tool, code, params }` as JSON on stdin. Its stdout is the
/// result: JSON when it parses, otherwise the trimmed text. A
/// `{ success, result, error }` envelope is unwrapped. The child is killed
/// when the timeout elapses.
pub struct ProcessSandbox {
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    async fn run(&self, tool_name: &str, code: &str, args: Value) -> Result<Value> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GraphError::CodeExecution(format!(
                    "failed to start {}: {}",
                    self.config.program, e
                ))
            })?;

        let request = json!({ "tool": tool_name, "code": code, "params": args });
        if let Some(mut stdin) = child.stdin.take() {
            let bytes = serde_json::to_vec(&request)?;
            if let Err(e) = stdin.write_all(&bytes).await {
                // The child may exit without reading its input; its output decides.
                debug!(tool = tool_name, error = %e, "Sandbox closed stdin early");
            }
        }

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| GraphError::CodeExecution(e.to_string()))?,
            Err(_) => {
                warn!(tool = tool_name, timeout_secs = self.config.timeout_secs, "Sandbox timed out");
                return Err(GraphError::CodeTimeout(self.config.timeout_secs));
            }
        };

        let stdout = truncate(&output.stdout, self.config.max_output_bytes);
        if !output.status.success() {
            let stderr = truncate(&output.stderr, self.config.max_output_bytes);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(GraphError::CodeExecution(format!(
                "{} exited with {}: {}",
                tool_name,
                output.status.code().unwrap_or(-1),
                detail.trim()
            )));
        }

        unwrap_envelope(parse_output(&stdout))
    }
}

impl CodeExecutor for ProcessSandbox {
    fn execute(&self, tool_name: &str, code: &str, args: Value) -> BoxFuture<'_, Result<Value>> {
        let tool_name = tool_name.to_string();
        let code = code.to_string();
        Box::pin(async move { self.run(&tool_name, &code, args).await })
    }
}

fn truncate(bytes: &[u8], max: usize) -> String {
    let end = bytes.len().min(max);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn unwrap_envelope(value: Value) -> Result<Value> {
    let Some(success) = value.get("success").and_then(Value::as_bool) else {
        return Ok(value);
    };
    if !success {
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("custom tool failed")
            .to_string();
        return Err(GraphError::CodeExecution(message));
    }
    Ok(value.get("result").cloned().unwrap_or(value))
}
