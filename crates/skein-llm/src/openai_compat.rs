//! OpenAI-compatible model implementation.
//!
//! [`OpenAiCompatModel`] speaks the chat-completions format used by
//! OpenAI and the many services that copy it (Groq, DeepSeek, Mistral,
//! OpenRouter, local servers). Point `api_base` at any of them.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use skein_types::config::ProviderConfig;
use skein_types::session::{Role, Turn};
use skein_types::tool::ToolCall;

use crate::error::{ModelError, Result};
use crate::model::{Model, ModelOutput, ModelRequest};

/// A [`Model`] backed by an OpenAI-compatible HTTP endpoint.
pub struct OpenAiCompatModel {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl OpenAiCompatModel {
    /// Create a model client from provider settings.
    ///
    /// The API key is resolved at request time: `config.api_key` first,
    /// then the environment variable named by `config.api_key_env`.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Returns the chat completions endpoint URL.
    fn completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.config.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.config.api_key_env).map_err(|_| {
            ModelError::NotConfigured(format!("set {} env var", self.config.api_key_env))
        })
    }
}

impl std::fmt::Debug for OpenAiCompatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatModel")
            .field("api_base", &self.config.api_base)
            .field("api_key_env", &self.config.api_key_env)
            .field("api_key", &self.config.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[async_trait]
impl Model for OpenAiCompatModel {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelOutput> {
        let api_key = self.resolve_api_key()?;
        let url = self.completions_url();

        debug!(
            model = %request.model,
            turns = request.history.len(),
            tools = request.tools.len(),
            "sending chat completion request"
        );

        let mut req = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json");
        for (k, v) in &self.config.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .json(&request_body(request))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status.as_u16(), body, retry_after_ms));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("failed to parse response: {e}")))?;
        parse_response(&body)
    }
}

fn map_transport_error(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Unavailable(err.to_string())
    }
}

/// `Retry-After` in delay-seconds form, as milliseconds.
fn parse_retry_after(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

fn map_status(status: u16, body: String, retry_after_ms: Option<u64>) -> ModelError {
    match status {
        429 => {
            let retry_after_ms = retry_after_ms.unwrap_or(1000);
            warn!(retry_after_ms, "rate limited");
            ModelError::RateLimited { retry_after_ms }
        }
        401 | 403 => ModelError::AuthFailed(body),
        500..=599 => ModelError::Unavailable(format!("HTTP {status}: {body}")),
        _ => ModelError::Request(format!("HTTP {status}: {body}")),
    }
}

/// Build the chat-completions JSON body.
fn request_body(request: &ModelRequest) -> Value {
    let messages: Vec<Value> = request.history.iter().map(turn_to_message).collect();
    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn turn_to_message(turn: &Turn) -> Value {
    match turn.role {
        Role::System => json!({"role": "system", "content": turn.content}),
        Role::User => json!({"role": "user", "content": turn.content}),
        Role::Assistant if !turn.tool_calls.is_empty() => {
            let calls: Vec<Value> = turn
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            json!({"role": "assistant", "content": turn.content, "tool_calls": calls})
        }
        Role::Assistant => json!({"role": "assistant", "content": turn.content}),
        Role::Tool => {
            let call_id = turn
                .tool_result
                .as_ref()
                .map(|r| r.call_id.as_str())
                .unwrap_or_default();
            json!({"role": "tool", "tool_call_id": call_id, "content": turn.content})
        }
    }
}

/// Interpret `choices[0].message`.
fn parse_response(body: &Value) -> Result<ModelOutput> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ModelError::InvalidResponse("response has no choices".into()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let raw_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if raw_calls.is_empty() {
        return Ok(ModelOutput::Text { text });
    }

    let mut calls = Vec::with_capacity(raw_calls.len());
    for (i, raw) in raw_calls.iter().enumerate() {
        let function = raw
            .get("function")
            .ok_or_else(|| ModelError::InvalidResponse("tool call without function".into()))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::InvalidResponse("tool call without name".into()))?;
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("call_{i}"));
        calls.push(ToolCall {
            id,
            name: name.to_string(),
            arguments: parse_arguments(function.get("arguments")),
        });
    }

    Ok(ModelOutput::ToolCalls { text, calls })
}

/// Arguments arrive as a JSON-encoded string. Unparseable input is kept
/// as a raw string so schema validation rejects it visibly.
fn parse_arguments(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::String(s)) if s.trim().is_empty() => json!({}),
        Some(Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Some(other) => other.clone(),
        None => json!({}),
    }
}
