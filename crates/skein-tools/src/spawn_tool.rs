//! Spawn tool for delegating a sub-task to a nested agent.
//!
//! The child runs in a fresh [`Session`] keyed `spawn:<parent key>:<uuid>`
//! with its own iteration budget, one nesting level deeper than the
//! caller. It shares only the model and the tool set with its parent.
//! The child session is never persisted; only the final answer is
//! returned to the parent as the tool result.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use skein_core::agent::runner::{RunnerSettings, TurnFailure, TurnRunner};
use skein_core::tools::registry::{Tool, ToolContext, ToolError};
use skein_llm::Model;
use skein_types::config::Config;
use skein_types::session::Session;

/// Maximum number of sub-agents running at once per tool instance.
const MAX_CONCURRENT_SPAWNS: usize = 5;

const SUBAGENT_PROMPT: &str = "You are a sub-agent working on a single delegated task. \
Use the available tools as needed, then reply with the result only.";

/// Runs a nested agent loop on a delegated task.
pub struct SpawnTool {
    model: Arc<dyn Model>,
    settings: RunnerSettings,
    max_depth: u32,
    max_iterations: u32,
    active: Arc<AtomicUsize>,
}

impl SpawnTool {
    pub fn new(model: Arc<dyn Model>, config: &Config) -> Self {
        let mut settings = RunnerSettings::from_config(config);
        settings.system_prompt = Some(SUBAGENT_PROMPT.to_string());
        Self {
            model,
            settings,
            max_depth: config.agents.spawn.max_depth,
            max_iterations: config.agents.spawn.max_iterations.max(1),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sub-agents currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Releases a concurrency slot when dropped.
struct SpawnSlot(Arc<AtomicUsize>);

impl SpawnSlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Option<Self> {
        let prev = counter.fetch_add(1, Ordering::SeqCst);
        if prev >= MAX_CONCURRENT_SPAWNS {
            counter.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(Arc::clone(counter)))
    }
}

impl Drop for SpawnSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained sub-task to an isolated sub-agent and return its final answer."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Complete description of the sub-task"
                },
                "label": {
                    "type": "string",
                    "description": "Short label for the sub-task"
                }
            },
            "required": ["task"]
        })
    }

    fn timeout(&self) -> Option<Duration> {
        // Every child iteration plus the final answer may wait on the model.
        Some(self.settings.model_timeout * (self.max_iterations + 1))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let task = args
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: task".into()))?;
        let label = args
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("subtask")
            .to_string();

        let depth = ctx.depth + 1;
        if depth > self.max_depth {
            warn!(depth, max = self.max_depth, key = %ctx.conversation_key, "spawn refused");
            return Err(ToolError::DepthExceeded {
                depth,
                max: self.max_depth,
            });
        }

        let _slot = SpawnSlot::acquire(&self.active).ok_or_else(|| {
            ToolError::ExecutionFailed(format!(
                "too many concurrent sub-agents (max {MAX_CONCURRENT_SPAWNS})"
            ))
        })?;

        let mut settings = self.settings.clone();
        settings.depth = ctx.depth;
        let settings = settings.child(self.max_iterations);
        let runner = TurnRunner::new(Arc::clone(&self.model), Arc::clone(&ctx.tools), settings);

        let mut session = Session::new(format!("spawn:{}:{}", ctx.conversation_key, Uuid::new_v4()));
        let cancel = ctx.cancel.child_token();
        info!(key = %session.key, %label, depth, "spawning sub-agent");

        match runner.run(&mut session, task, &cancel).await {
            Ok(outcome) => {
                debug!(
                    key = %session.key,
                    iterations = outcome.iterations,
                    status = %outcome.status,
                    "sub-agent finished"
                );
                Ok(json!({
                    "label": label,
                    "status": outcome.status.as_str(),
                    "result": outcome.text,
                }))
            }
            Err(TurnFailure::Cancelled) => Err(ToolError::Cancelled),
            Err(e) => Err(ToolError::ExecutionFailed(format!("sub-agent failed: {e}"))),
        }
    }
}
