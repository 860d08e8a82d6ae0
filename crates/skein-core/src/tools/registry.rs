//! Tool registry and [`Tool`] trait definition.
//!
//! Tools are registered by name together with a JSON Schema for their
//! arguments. [`ToolRegistry::execute`] never returns an error: unknown
//! names, schema mismatches, failures, panics and timeouts all come back
//! as a failed [`ToolResult`] the model can read and react to.
//!
//! Tool implementations live in the `skein-tools` crate; this module only
//! defines the contract and the dispatcher.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skein_types::tool::{ToolCall, ToolFailureKind, ToolResult, ToolSchema};

use crate::security::{MAX_TOOL_OUTPUT_BYTES, truncate_output};

/// Default bound on a single tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Error type for tool execution.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// Arguments passed schema validation but are still unusable.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool ran and failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A file or directory the tool needs does not exist.
    #[error("not found: {0}")]
    FileNotFound(String),

    /// A path is malformed or leaves the allowed directory.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The request was refused by a safety rule.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The declared parameter schema is not a valid JSON Schema.
    #[error("invalid schema for tool '{tool}': {reason}")]
    InvalidSchema { tool: String, reason: String },

    /// A nested agent would exceed the nesting limit.
    #[error("nesting depth {depth} exceeds limit {max}")]
    DepthExceeded { depth: u32, max: u32 },

    /// The surrounding turn was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// What a tool sees of the turn that invoked it.
#[derive(Clone)]
pub struct ToolContext {
    /// Conversation the call belongs to.
    pub conversation_key: String,
    /// Nesting depth of the calling agent; 0 for a top-level turn.
    pub depth: u32,
    /// Cancelled when the calling turn is cancelled.
    pub cancel: CancellationToken,
    /// The registry the call was dispatched from.
    pub tools: Arc<ToolRegistry>,
}

impl ToolContext {
    pub fn new(conversation_key: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            conversation_key: conversation_key.into(),
            depth: 0,
            cancel: CancellationToken::new(),
            tools,
        }
    }
}

/// A named capability the model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in model function calling.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Run the tool. `args` has already been validated against
    /// [`parameters`](Tool::parameters).
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    /// Per-tool time limit overriding the registry default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

struct Registered {
    tool: Arc<dyn Tool>,
    validator: jsonschema::Validator,
}

/// Registry of available tools, indexed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Set the default per-invocation time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Register a tool, replacing any tool with the same name.
    ///
    /// Fails if the tool's parameter schema does not compile.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        let validator =
            jsonschema::validator_for(&tool.parameters()).map_err(|e| ToolError::InvalidSchema {
                tool: name.clone(),
                reason: e.to_string(),
            })?;
        if self
            .tools
            .insert(name.clone(), Registered { tool, validator })
            .is_some()
        {
            warn!(tool = %name, "replaced existing tool registration");
        } else {
            debug!(tool = %name, "registered tool");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| Arc::clone(&r.tool))
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas advertised to the model, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|r| ToolSchema {
                name: r.tool.name().to_string(),
                description: r.tool.description().to_string(),
                parameters: r.tool.parameters(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve one call into a [`ToolResult`].
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some(entry) = self.tools.get(&call.name) else {
            debug!(tool = %call.name, call_id = %call.id, "unknown tool");
            return ToolResult::failure(
                call,
                ToolFailureKind::UnknownTool,
                format!("no tool named '{}' is registered", call.name),
            );
        };

        let violations: Vec<String> = entry
            .validator
            .iter_errors(&call.arguments)
            .map(|e| e.to_string())
            .collect();
        if !violations.is_empty() {
            debug!(tool = %call.name, call_id = %call.id, ?violations, "arguments rejected");
            return ToolResult::failure(
                call,
                ToolFailureKind::InvalidArguments,
                violations.join("; "),
            );
        }

        let limit = entry.tool.timeout().unwrap_or(self.timeout);
        debug!(tool = %call.name, call_id = %call.id, depth = ctx.depth, "executing tool");
        let invocation =
            AssertUnwindSafe(entry.tool.execute(call.arguments.clone(), ctx)).catch_unwind();
        match tokio::time::timeout(limit, invocation).await {
            Ok(Ok(Ok(output))) => {
                ToolResult::success(call, truncate_output(output, MAX_TOOL_OUTPUT_BYTES))
            }
            Ok(Ok(Err(e))) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "tool failed");
                ToolResult::failure(call, ToolFailureKind::ToolExecutionError, e.to_string())
            }
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                warn!(tool = %call.name, call_id = %call.id, panic = %message, "tool panicked");
                ToolResult::failure(
                    call,
                    ToolFailureKind::ToolExecutionError,
                    format!("tool panicked: {message}"),
                )
            }
            Err(_) => {
                warn!(tool = %call.name, call_id = %call.id, limit_secs = limit.as_secs(), "tool timed out");
                ToolResult::failure(
                    call,
                    ToolFailureKind::ToolExecutionError,
                    format!("timed out after {}s", limit.as_secs()),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
