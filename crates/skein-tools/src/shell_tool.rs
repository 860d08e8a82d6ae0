//! Shell execution tool.
//!
//! Runs `sh -c <command>` in the workspace with a bounded timeout. The
//! child is killed when the timeout passes or the turn is cancelled.
//! Commands matching a small set of destructive patterns are refused.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use skein_core::tools::registry::{Tool, ToolContext, ToolError};
use skein_types::config::ExecConfig;

/// Substrings (lowercase) that are never executed.
const DENIED_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "sudo ",
    "mkfs",
    "dd if=",
    ":(){ :|:& };:",
    "chmod 777 /",
    "> /dev/sd",
    "shutdown",
    "reboot",
    "poweroff",
];

/// Output streams longer than this are cut before being returned.
const MAX_STREAM_BYTES: usize = 32 * 1024;

/// Execute shell commands inside the workspace.
pub struct ExecTool {
    workspace: PathBuf,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl ExecTool {
    pub fn new(workspace: impl Into<PathBuf>, config: &ExecConfig) -> Self {
        let default_timeout = Duration::from_secs(config.timeout_secs.max(1));
        Self {
            workspace: workspace.into(),
            default_timeout,
            max_timeout: Duration::from_secs(config.max_timeout_secs).max(default_timeout),
        }
    }
}

/// The first denied pattern `command` contains, if any.
pub fn denied_pattern(command: &str) -> Option<&'static str> {
    let lower = command.to_lowercase();
    DENIED_PATTERNS.iter().copied().find(|p| lower.contains(p))
}

fn clip(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_STREAM_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_STREAM_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... ({} more bytes)", &text[..end], text.len() - end)
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its exit code, stdout and stderr."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Shell command to run"
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Timeout in seconds"
                }
            },
            "required": ["command"]
        })
    }

    fn timeout(&self) -> Option<Duration> {
        // Leave room for the command's own timeout to be reported.
        Some(self.max_timeout + Duration::from_secs(5))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: command".into()))?;
        let limit = args
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout);

        if let Some(pattern) = denied_pattern(command) {
            warn!(command, pattern, "command refused");
            return Err(ToolError::PermissionDenied(format!(
                "command matches denied pattern {pattern:?}"
            )));
        }

        tokio::fs::create_dir_all(&self.workspace)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("workspace unavailable: {e}")))?;

        debug!(command, timeout_secs = limit.as_secs(), "executing shell command");
        let start = Instant::now();
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to spawn process: {e}")))?;

        // Dropping the output future drops the child, which kills it.
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            result = tokio::time::timeout(limit, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(ToolError::ExecutionFailed(format!("process error: {e}"))),
                Err(_) => {
                    return Err(ToolError::ExecutionFailed(format!(
                        "command timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
        };

        Ok(json!({
            "exit_code": output.status.code().unwrap_or(-1),
            "stdout": clip(&output.stdout),
            "stderr": clip(&output.stderr),
            "duration_ms": start.elapsed().as_millis() as u64,
        }))
    }
}
