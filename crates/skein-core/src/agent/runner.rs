//! Turn runner: the think/act/observe state machine.
//!
//! ```text
//! Idle -> Thinking -> (ToolPending -> Thinking)* -> Responding -> Done
//!            \______________ any state _____________/-> Failed
//! ```
//!
//! - `Thinking` sends the session history to the [`Model`] (with retry
//!   and a per-attempt timeout) and gets either text or tool calls.
//! - `ToolPending` runs every requested call concurrently through the
//!   [`ToolRegistry`] and appends the results in request order. Each
//!   completed cycle counts toward `max_iterations`; when the cap is
//!   reached the runner responds with a truncation notice instead of
//!   asking the model again.
//! - `Responding` appends the final answer.
//!
//! Cancellation is honored between states and while waiting on the
//! model, never in the middle of a tool invocation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skein_llm::{CallError, Model, ModelError, ModelOutput, ModelRequest, RetryConfig, complete_with_retry};
use skein_types::config::Config;
use skein_types::session::{Session, Turn};
use skein_types::tool::ToolCall;

use crate::session::SessionManager;
use crate::tools::registry::{ToolContext, ToolRegistry};

/// Settings for one [`TurnRunner`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Tool cycles allowed per turn.
    pub max_iterations: u32,
    /// Prepended to every model request, never stored.
    pub system_prompt: Option<String>,
    pub model_timeout: Duration,
    pub retry: RetryConfig,
    /// Nesting depth; 0 for turns driven by the bus.
    pub depth: u32,
}

impl RunnerSettings {
    /// Top-level settings from the application config.
    pub fn from_config(config: &Config) -> Self {
        let defaults = &config.agents.defaults;
        Self {
            model: defaults.model.clone(),
            max_tokens: Some(defaults.max_tokens),
            temperature: Some(defaults.temperature),
            max_iterations: defaults.max_tool_iterations.max(1),
            system_prompt: defaults.system_prompt.clone(),
            model_timeout: Duration::from_secs(defaults.model_timeout_secs),
            retry: RetryConfig::from(&config.agents.retry),
            depth: 0,
        }
    }

    /// Settings for a nested agent one level below `self`.
    pub fn child(&self, max_iterations: u32) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            depth: self.depth + 1,
            ..self.clone()
        }
    }
}

/// How a completed turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model produced a final answer.
    Ok,
    /// The tool-iteration cap was reached.
    Truncated,
    /// The model interface failed.
    Failed,
    /// The turn was cancelled.
    Cancelled,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Truncated => "truncated",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a turn that reached `Done`.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Final text appended to the session.
    pub text: String,
    /// `Ok` or `Truncated`.
    pub status: TurnStatus,
    /// Completed tool cycles.
    pub iterations: u32,
}

/// Why a turn ended in `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum TurnFailure {
    #[error("turn cancelled")]
    Cancelled,

    #[error("model call failed after {attempts} attempt(s): {error}")]
    Model { error: ModelError, attempts: u32 },
}

impl TurnFailure {
    pub fn status(&self) -> TurnStatus {
        match self {
            Self::Cancelled => TurnStatus::Cancelled,
            Self::Model { .. } => TurnStatus::Failed,
        }
    }
}

impl From<CallError> for TurnFailure {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Cancelled => Self::Cancelled,
            CallError::Failed { error, attempts } => Self::Model { error, attempts },
        }
    }
}

enum LoopState {
    Thinking,
    ToolPending { text: String, calls: Vec<ToolCall> },
    Responding { text: String, status: TurnStatus },
}

/// Drives one turn of a session to completion.
pub struct TurnRunner {
    model: Arc<dyn Model>,
    tools: Arc<ToolRegistry>,
    settings: RunnerSettings,
    checkpoint: Option<Arc<SessionManager>>,
}

impl TurnRunner {
    pub fn new(model: Arc<dyn Model>, tools: Arc<ToolRegistry>, settings: RunnerSettings) -> Self {
        Self {
            model,
            tools,
            settings,
            checkpoint: None,
        }
    }

    /// Persist the session after every completed tool cycle.
    pub fn with_checkpoints(mut self, sessions: Arc<SessionManager>) -> Self {
        self.checkpoint = Some(sessions);
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Run one turn: append `input` as a user turn and loop until the
    /// model answers, the iteration cap is hit, the model fails, or
    /// `cancel` fires.
    ///
    /// On failure the session keeps whatever was appended so far; the
    /// caller decides whether to roll it back.
    pub async fn run(
        &self,
        session: &mut Session,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnFailure> {
        session.push(Turn::user(input));
        let mut iterations = 0u32;
        let mut state = LoopState::Thinking;

        loop {
            if cancel.is_cancelled() {
                info!(key = %session.key, iterations, "turn cancelled");
                return Err(TurnFailure::Cancelled);
            }

            state = match state {
                LoopState::Thinking => {
                    let request = self.build_request(session);
                    debug!(
                        key = %session.key,
                        iteration = iterations,
                        history = request.history.len(),
                        "thinking"
                    );
                    let output = complete_with_retry(
                        self.model.as_ref(),
                        &request,
                        &self.settings.retry,
                        self.settings.model_timeout,
                        cancel,
                    )
                    .await?;

                    match output {
                        ModelOutput::Text { text } => LoopState::Responding {
                            text,
                            status: TurnStatus::Ok,
                        },
                        ModelOutput::ToolCalls { text, calls } if calls.is_empty() => {
                            LoopState::Responding {
                                text,
                                status: TurnStatus::Ok,
                            }
                        }
                        ModelOutput::ToolCalls { text, calls } => {
                            session.push(Turn::assistant_tool_calls(text.clone(), calls.clone()));
                            LoopState::ToolPending { text, calls }
                        }
                    }
                }

                LoopState::ToolPending { text, calls } => {
                    self.run_tools(session, &calls, cancel).await;
                    iterations += 1;
                    self.checkpoint(session).await;

                    if iterations >= self.settings.max_iterations {
                        warn!(
                            key = %session.key,
                            max = self.settings.max_iterations,
                            "tool iteration cap reached"
                        );
                        LoopState::Responding {
                            text: truncation_notice(&text, self.settings.max_iterations),
                            status: TurnStatus::Truncated,
                        }
                    } else {
                        LoopState::Thinking
                    }
                }

                LoopState::Responding { text, status } => {
                    session.push(Turn::assistant(text.clone()));
                    debug!(key = %session.key, iterations, %status, "turn done");
                    return Ok(TurnOutcome {
                        text,
                        status,
                        iterations,
                    });
                }
            };
        }
    }

    fn build_request(&self, session: &Session) -> ModelRequest {
        let mut history = Vec::with_capacity(session.len() + 1);
        if let Some(prompt) = &self.settings.system_prompt {
            history.push(Turn::system(prompt.clone()));
        }
        history.extend(session.turns.iter().cloned());

        let mut request = ModelRequest::new(self.settings.model.clone(), history);
        request.tools = self.tools.schemas();
        request.max_tokens = self.settings.max_tokens;
        request.temperature = self.settings.temperature;
        request
    }

    async fn run_tools(&self, session: &mut Session, calls: &[ToolCall], cancel: &CancellationToken) {
        let ctx = ToolContext {
            conversation_key: session.key.clone(),
            depth: self.settings.depth,
            cancel: cancel.clone(),
            tools: Arc::clone(&self.tools),
        };
        let results = join_all(calls.iter().map(|call| self.tools.execute(call, &ctx))).await;
        for result in results {
            debug!(
                key = %session.key,
                tool = %result.name,
                call_id = %result.call_id,
                ok = result.is_success(),
                "tool result"
            );
            session.push(Turn::tool(result));
        }
    }

    async fn checkpoint(&self, session: &mut Session) {
        if let Some(sessions) = &self.checkpoint {
            if let Err(e) = sessions.save(session).await {
                warn!(key = %session.key, error = %e, "checkpoint save failed");
            }
        }
    }
}

fn truncation_notice(text: &str, max: u32) -> String {
    let notice = format!("[Stopped after {max} tool iterations without a final answer.]");
    let text = text.trim_end();
    if text.is_empty() {
        notice
    } else {
        format!("{text}\n\n{notice}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use skein_types::session::Role;
    use skein_types::tool::ToolFailureKind;

    use crate::tools::registry::{Tool, ToolError};

    /// Replays scripted outputs, then repeats the last one.
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<ModelOutput, ModelError>>>,
        last: Mutex<Option<Result<ModelOutput, ModelError>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<ModelOutput, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Model for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ModelRequest) -> skein_llm::Result<ModelOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(request.clone());
            let next = self.script.lock().pop_front();
            match next {
                Some(out) => {
                    *self.last.lock() = Some(out.clone());
                    out
                }
                None => self
                    .last
                    .lock()
                    .clone()
                    .unwrap_or_else(|| Ok(ModelOutput::text(""))),
            }
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo text back"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(args["text"].clone())
        }
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args,
        }
    }

    fn settings(max_iterations: u32) -> RunnerSettings {
        RunnerSettings {
            model: "test-model".into(),
            max_tokens: None,
            temperature: None,
            max_iterations,
            system_prompt: None,
            model_timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter_fraction: 0.0,
            },
            depth: 0,
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool)).unwrap();
        Arc::new(reg)
    }

    #[tokio::test]
    async fn text_answer_completes_in_one_call() {
        let model = ScriptedModel::new(vec![Ok(ModelOutput::text("4"))]);
        let runner = TurnRunner::new(model.clone(), registry(), settings(5));
        let mut session = Session::new("u1");

        let outcome = runner
            .run(&mut session, "2+2?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.text, "4");
        assert_eq!(outcome.status, TurnStatus::Ok);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(session.len(), 2);
        assert_eq!(session.turns[0].role, Role::User);
        assert_eq!(session.turns[1].content, "4");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tool_results_fed_back_in_request_order() {
        let model = ScriptedModel::new(vec![
            Ok(ModelOutput::tool_calls(vec![
                call("a", "echo", json!({"text": "first"})),
                call("b", "echo", json!({"text": "second"})),
            ])),
            Ok(ModelOutput::text("done")),
        ]);
        let runner = TurnRunner::new(model.clone(), registry(), settings(5));
        let mut session = Session::new("u1");

        let outcome = runner
            .run(&mut session, "go", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 1);

        // user, assistant(tool calls), tool a, tool b, assistant
        let roles: Vec<Role> = session.turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(session.turns[2].content, "first");
        assert_eq!(session.turns[3].content, "second");

        let second = &model.seen.lock()[1];
        assert_eq!(second.history.len(), 4);
        assert_eq!(second.tools.len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_feeds_back_and_continues() {
        let model = ScriptedModel::new(vec![
            Ok(ModelOutput::tool_calls(vec![call("x", "does_not_exist", json!({}))])),
            Ok(ModelOutput::text("sorry, no such tool")),
        ]);
        let runner = TurnRunner::new(model, registry(), settings(5));
        let mut session = Session::new("u1");

        let outcome = runner
            .run(&mut session, "go", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, TurnStatus::Ok);
        let tool_turn = &session.turns[2];
        assert_eq!(
            tool_turn.tool_result.as_ref().unwrap().failure_kind(),
            Some(ToolFailureKind::UnknownTool)
        );
    }

    #[tokio::test]
    async fn iteration_cap_forces_response() {
        let model = ScriptedModel::new(vec![Ok(ModelOutput::ToolCalls {
            text: "still working".into(),
            calls: vec![call("c", "echo", json!({"text": "again"}))],
        })]);
        let runner = TurnRunner::new(model.clone(), registry(), settings(3));
        let mut session = Session::new("u1");

        let outcome = runner
            .run(&mut session, "loop forever", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Truncated);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert!(outcome.text.starts_with("still working"));
        assert!(outcome.text.contains("Stopped after 3 tool iterations"));
        assert_eq!(session.turns.last().unwrap().content, outcome.text);
    }

    #[tokio::test]
    async fn model_failure_after_retries() {
        let model = ScriptedModel::new(vec![Err(ModelError::Unavailable("down".into()))]);
        let runner = TurnRunner::new(model.clone(), registry(), settings(3));
        let mut session = Session::new("u1");

        let err = runner
            .run(&mut session, "hi", &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            TurnFailure::Model { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let model = ScriptedModel::new(vec![Ok(ModelOutput::text("never"))]);
        let runner = TurnRunner::new(model.clone(), registry(), settings(3));
        let mut session = Session::new("u1");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = runner.run(&mut session, "hi", &cancel).await.unwrap_err();
        assert!(matches!(err, TurnFailure::Cancelled));
        assert_eq!(err.status(), TurnStatus::Cancelled);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn system_prompt_sent_not_stored() {
        let model = ScriptedModel::new(vec![Ok(ModelOutput::text("hi"))]);
        let mut s = settings(3);
        s.system_prompt = Some("be brief".into());
        let runner = TurnRunner::new(model.clone(), registry(), s);
        let mut session = Session::new("u1");

        runner
            .run(&mut session, "hello", &CancellationToken::new())
            .await
            .unwrap();

        let sent = &model.seen.lock()[0];
        assert_eq!(sent.history[0].role, Role::System);
        assert_eq!(sent.history[0].content, "be brief");
        assert!(session.turns.iter().all(|t| t.role != Role::System));
    }

    #[tokio::test]
    async fn checkpoints_after_each_cycle() {
        let sessions = Arc::new(SessionManager::in_memory());
        let model = ScriptedModel::new(vec![
            Ok(ModelOutput::tool_calls(vec![call("a", "echo", json!({"text": "1"}))])),
            Ok(ModelOutput::tool_calls(vec![call("b", "echo", json!({"text": "2"}))])),
            Ok(ModelOutput::text("done")),
        ]);
        let runner =
            TurnRunner::new(model, registry(), settings(5)).with_checkpoints(sessions.clone());
        let mut session = Session::new("u1");

        runner
            .run(&mut session, "go", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.revision, 2);
        let stored = sessions.get("u1").await.unwrap().unwrap();
        // Second checkpoint: user, call a, result a, call b, result b.
        assert_eq!(stored.len(), 5);
    }

    #[test]
    fn child_settings_go_one_level_deeper() {
        let parent = settings(20);
        let child = parent.child(0);
        assert_eq!(child.depth, 1);
        assert_eq!(child.max_iterations, 1);
        assert_eq!(child.model, parent.model);
    }

    #[test]
    fn truncation_notice_without_text() {
        assert_eq!(
            truncation_notice("  ", 2),
            "[Stopped after 2 tool iterations without a final answer.]"
        );
    }
}
