//! Conversation session types.
//!
//! A [`Session`] is the history one conversation key accumulates across
//! turns. It is owned by the agent loop while a turn is processed; the
//! bus and dispatcher never touch it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ToolCall, ToolResult};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One role-attributed entry in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,

    #[serde(default)]
    pub content: String,

    /// Calls requested by the model in this turn (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Resolution of a single call (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn carrying tool call requests.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut turn = Self::plain(Role::Assistant, content);
        turn.tool_calls = calls;
        turn
    }

    /// Tool turn carrying one result.
    pub fn tool(result: ToolResult) -> Self {
        let mut turn = Self::plain(Role::Tool, result.to_content());
        turn.tool_result = Some(result);
        turn
    }
}

/// Per-conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Conversation key.
    pub key: String,

    /// Ordered history.
    #[serde(default)]
    pub turns: Vec<Turn>,

    /// Bumped on every save.
    #[serde(default)]
    pub revision: u64,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub last_activity: DateTime<Utc>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    /// Create a new empty session.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            turns: Vec::new(),
            revision: 0,
            created_at: now,
            last_activity: now,
            metadata: HashMap::new(),
        }
    }

    /// Append a turn and touch `last_activity`.
    pub fn push(&mut self, turn: Turn) {
        self.last_activity = turn.timestamp;
        self.turns.push(turn);
    }

    /// The most recent `max` turns.
    pub fn history(&self, max: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(max);
        &self.turns[start..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
