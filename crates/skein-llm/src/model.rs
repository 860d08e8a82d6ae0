//! The [`Model`] trait and its request/response types.
//!
//! The agent loop treats the model as a single abstracted call: given the
//! conversation history and the tools on offer, it returns either a final
//! text answer or a set of tool calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use skein_types::session::Turn;
use skein_types::tool::{ToolCall, ToolSchema};

use crate::error::Result;

/// One model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Model identifier passed through to the provider.
    pub model: String,
    /// Conversation so far, oldest first. May start with a system turn.
    pub history: Vec<Turn>,
    /// Tools the model may request.
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ModelRequest {
    /// Request with no tools and provider-default sampling.
    pub fn new(model: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            model: model.into(),
            history,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        }
    }
}

/// The two tagged outcomes of a model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelOutput {
    /// A final answer.
    Text { text: String },
    /// One or more tool invocations, with any text the model attached.
    ToolCalls {
        #[serde(default)]
        text: String,
        calls: Vec<ToolCall>,
    },
}

impl ModelOutput {
    /// Final answer.
    pub fn text(text: impl Into<String>) -> Self {
        ModelOutput::Text { text: text.into() }
    }

    /// Tool call request with no accompanying text.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        ModelOutput::ToolCalls {
            text: String::new(),
            calls,
        }
    }
}

/// A model that can answer a [`ModelRequest`].
///
/// The main implementation is
/// [`OpenAiCompatModel`](crate::openai_compat::OpenAiCompatModel); tests
/// use scripted implementations.
#[async_trait]
pub trait Model: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run one completion.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`](crate::error::ModelError) when the backing
    /// service is unreachable, slow, throttling, or returns garbage.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelOutput>;
}
