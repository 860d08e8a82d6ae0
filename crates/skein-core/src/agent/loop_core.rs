//! Bus-facing agent loop.
//!
//! ```text
//! Inbound event
//!   |
//!   v
//! per-key lock -> session load (created lazily)
//!   |
//!   v
//! TurnRunner (think / tools / respond)
//!   |
//!   +-- Done   -> save session
//!   +-- Failed -> restore pre-turn snapshot
//!   |
//!   v
//! exactly one Outbound reply (status: ok | truncated | failed | cancelled)
//! ```

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use skein_types::error::SkeinError;
use skein_types::event::{Event, Payload};
use skein_types::session::Session;

use crate::bus::MessageBus;
use crate::security::sanitize_text;
use crate::session::SessionManager;

use super::runner::{TurnFailure, TurnRunner, TurnStatus};

const CANCELLED_REPLY: &str = "Cancelled.";

/// Processes inbound events one turn at a time per conversation.
pub struct AgentLoop {
    runner: TurnRunner,
    sessions: Arc<SessionManager>,
    bus: Arc<MessageBus>,
}

impl AgentLoop {
    /// Create the loop. Checkpoints after each tool cycle go to `sessions`.
    pub fn new(runner: TurnRunner, sessions: Arc<SessionManager>, bus: Arc<MessageBus>) -> Self {
        Self {
            runner: runner.with_checkpoints(Arc::clone(&sessions)),
            sessions,
            bus,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Run one turn for `event` and publish its reply.
    ///
    /// Always publishes exactly one Outbound event. The returned status
    /// mirrors the `status` field of that reply.
    pub async fn handle_inbound(
        &self,
        event: Event,
        cancel: CancellationToken,
    ) -> Result<TurnStatus, SkeinError> {
        let key = event.conversation_key.clone();

        let _guard = match self.sessions.lock(&key).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(key = %key, error = %e, "rejecting inbound event");
                self.reply(&event, format!("Sorry, an error occurred: {e}"), TurnStatus::Failed)?;
                return Ok(TurnStatus::Failed);
            }
        };

        let mut session = match self.sessions.load(&key).await {
            Ok(session) => session,
            Err(e) => {
                error!(key = %key, error = %e, "failed to load session");
                self.reply(&event, format!("Sorry, an error occurred: {e}"), TurnStatus::Failed)?;
                return Ok(TurnStatus::Failed);
            }
        };
        let snapshot = session.clone();

        info!(
            key = %key,
            source = %event.source,
            event_id = %event.id,
            "processing inbound event"
        );

        let input = sanitize_text(&event.payload.text);
        let (text, status) = match self.runner.run(&mut session, &input, &cancel).await {
            Ok(outcome) => {
                if let Err(e) = self.sessions.save(&mut session).await {
                    error!(key = %key, error = %e, "failed to save session");
                }
                (outcome.text, outcome.status)
            }
            Err(failure) => {
                self.restore(session, snapshot).await;
                let text = match &failure {
                    TurnFailure::Cancelled => CANCELLED_REPLY.to_string(),
                    TurnFailure::Model { error, .. } => {
                        error!(key = %key, error = %failure, "turn failed");
                        format!("Sorry, an error occurred: {error}")
                    }
                };
                (text, failure.status())
            }
        };

        self.reply(&event, text, status)?;
        info!(key = %key, event_id = %event.id, %status, "turn finished");
        Ok(status)
    }

    /// Put the pre-turn history back if checkpoints moved past it.
    async fn restore(&self, current: Session, snapshot: Session) {
        if current.revision == snapshot.revision {
            return;
        }
        let mut restored = snapshot;
        restored.revision = current.revision;
        if let Err(e) = self.sessions.save(&mut restored).await {
            error!(key = %restored.key, error = %e, "failed to restore session snapshot");
        }
    }

    fn reply(&self, request: &Event, text: String, status: TurnStatus) -> Result<(), SkeinError> {
        let payload = Payload::text(text).with_data(json!({"status": status.as_str()}));
        self.bus.publish(Event::reply(request, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    use skein_llm::{Model, ModelError, ModelOutput, ModelRequest, RetryConfig};
    use skein_types::event::Topic;
    use skein_types::tool::ToolCall;

    use crate::agent::runner::RunnerSettings;
    use crate::bus::handler_fn;
    use crate::tools::registry::{Tool, ToolContext, ToolError, ToolRegistry};

    /// Requests the noop tool once, then fails or answers depending on `fail`.
    struct ToolThenModel {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Model for ToolThenModel {
        fn name(&self) -> &str {
            "tool-then"
        }
        async fn complete(&self, _req: &ModelRequest) -> skein_llm::Result<ModelOutput> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(ModelOutput::tool_calls(vec![ToolCall {
                    id: "c1".into(),
                    name: "noop".into(),
                    arguments: serde_json::json!({}),
                }]));
            }
            if self.fail {
                Err(ModelError::AuthFailed("bad key".into()))
            } else {
                Ok(ModelOutput::text("all done"))
            }
        }
    }

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "Does nothing"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    fn agent(model: Arc<dyn Model>) -> (AgentLoop, Arc<Mutex<Vec<Event>>>) {
        let bus = Arc::new(MessageBus::new());
        let outbound = Arc::new(Mutex::new(Vec::new()));
        let sink = outbound.clone();
        bus.subscribe(
            Topic::Outbound,
            handler_fn(move |event: Event| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(event);
                    Ok(())
                }
            }),
        );

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(NoopTool)).unwrap();
        let settings = RunnerSettings {
            model: "m".into(),
            max_tokens: None,
            temperature: None,
            max_iterations: 5,
            system_prompt: None,
            model_timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            },
            depth: 0,
        };
        let runner = TurnRunner::new(model, Arc::new(tools), settings);
        let sessions = Arc::new(SessionManager::in_memory());
        (AgentLoop::new(runner, sessions, bus), outbound)
    }

    #[tokio::test]
    async fn success_saves_and_replies_ok() {
        let (agent, outbound) = agent(Arc::new(ToolThenModel {
            calls: AtomicUsize::new(0),
            fail: false,
        }));
        let inbound = Event::inbound("cli", "u1", "do it");
        let status = agent
            .handle_inbound(inbound.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, TurnStatus::Ok);
        agent.bus().wait_idle().await;

        let out = outbound.lock();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.text, "all done");
        assert_eq!(out[0].correlation_id, inbound.id);
        assert_eq!(out[0].payload.data.as_ref().unwrap()["status"], "ok");

        let stored = agent.sessions().get("u1").await.unwrap().unwrap();
        assert_eq!(stored.len(), 4);
    }

    #[tokio::test]
    async fn failure_restores_snapshot() {
        let (agent, outbound) = agent(Arc::new(ToolThenModel {
            calls: AtomicUsize::new(0),
            fail: true,
        }));
        let status = agent
            .handle_inbound(Event::inbound("cli", "u1", "do it"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, TurnStatus::Failed);
        agent.bus().wait_idle().await;

        let out = outbound.lock();
        assert_eq!(out.len(), 1);
        assert!(out[0].payload.text.starts_with("Sorry, an error occurred"));
        assert_eq!(out[0].payload.data.as_ref().unwrap()["status"], "failed");

        // The checkpoint after the tool cycle was rolled back.
        let stored = agent.sessions().get("u1").await.unwrap().unwrap();
        assert!(stored.is_empty());
        assert_eq!(stored.revision, 2);
    }

    #[tokio::test]
    async fn cancelled_turn_replies_cancelled() {
        let (agent, outbound) = agent(Arc::new(ToolThenModel {
            calls: AtomicUsize::new(0),
            fail: false,
        }));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = agent
            .handle_inbound(Event::inbound("cli", "u1", "hi"), cancel)
            .await
            .unwrap();
        assert_eq!(status, TurnStatus::Cancelled);
        agent.bus().wait_idle().await;

        let out = outbound.lock();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.text, CANCELLED_REPLY);
        assert!(agent.sessions().get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_key_still_gets_one_reply() {
        let (agent, outbound) = agent(Arc::new(ToolThenModel {
            calls: AtomicUsize::new(0),
            fail: false,
        }));
        let status = agent
            .handle_inbound(Event::inbound("cli", "../etc", "hi"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, TurnStatus::Failed);
        agent.bus().wait_idle().await;
        assert_eq!(outbound.lock().len(), 1);
    }
}
