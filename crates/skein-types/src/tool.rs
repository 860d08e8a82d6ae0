//! Tool invocation types shared by the model interface, the executor
//! and session history.

use serde::{Deserialize, Serialize};

/// A tool the model may call, as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema describing the arguments object.
    pub parameters: serde_json::Value,
}

/// A requested invocation.
///
/// `id` is unique within a turn so results can be matched back even if
/// tools complete out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier assigned by the model.
    pub id: String,
    /// Name of the tool to run.
    pub name: String,
    /// Arguments, checked against the tool's schema before invocation.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// Arguments did not match the declared schema. The tool was not run.
    InvalidArguments,
    /// No tool is registered under the requested name.
    UnknownTool,
    /// The tool ran and failed, or timed out.
    ToolExecutionError,
}

/// Resolution of a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool returned a value.
    Success {
        /// Tool output.
        output: serde_json::Value,
    },
    /// The tool could not produce a value.
    Failure {
        /// Failure category.
        kind: ToolFailureKind,
        /// Description of the underlying cause.
        message: String,
    },
}

/// The result of one tool call, matched back to its call by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the [`ToolCall`] this resolves.
    pub call_id: String,
    /// Tool name as requested.
    pub name: String,
    /// What happened.
    pub outcome: ToolOutcome,
}

impl ToolResult {
    /// Successful result.
    pub fn success(call: &ToolCall, output: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Success { output },
        }
    }

    /// Failed result.
    pub fn failure(call: &ToolCall, kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Failure {
                kind,
                message: message.into(),
            },
        }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    /// The failure kind, if the call failed.
    pub fn failure_kind(&self) -> Option<ToolFailureKind> {
        match &self.outcome {
            ToolOutcome::Failure { kind, .. } => Some(*kind),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// Model-facing rendering of the outcome.
    pub fn to_content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { output } => match output {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            ToolOutcome::Failure { kind, message } => serde_json::json!({
                "error": kind,
                "message": message,
            })
            .to_string(),
        }
    }
}
