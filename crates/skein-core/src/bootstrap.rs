//! Application bootstrap and dependency wiring.
//!
//! [`AppContext`] builds the core components from a [`Config`], lets the
//! caller register tools, then produces a started [`Dispatcher`].
//!
//! ```rust,ignore
//! let mut ctx = AppContext::new(config.clone(), model.clone(), store);
//! skein_tools::register_all(ctx.tools_mut(), model, &config)?;
//! let dispatcher = ctx.into_dispatcher();
//! dispatcher.attach_channel(console);
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use skein_llm::Model;
use skein_types::config::Config;

use crate::agent::loop_core::AgentLoop;
use crate::agent::runner::{RunnerSettings, TurnRunner};
use crate::bus::MessageBus;
use crate::dispatcher::Dispatcher;
use crate::session::{JsonlSessionStore, SessionManager, SessionStore};
use crate::tools::registry::ToolRegistry;

/// Core components wired from configuration.
pub struct AppContext {
    config: Config,
    bus: Arc<MessageBus>,
    sessions: Arc<SessionManager>,
    tools: ToolRegistry,
    model: Arc<dyn Model>,
}

impl AppContext {
    pub fn new(config: Config, model: Arc<dyn Model>, store: Arc<dyn SessionStore>) -> Self {
        let tools = ToolRegistry::new()
            .with_timeout(Duration::from_secs(config.agents.defaults.tool_timeout_secs));
        Self {
            config,
            bus: Arc::new(MessageBus::new()),
            sessions: Arc::new(SessionManager::new(store)),
            tools,
            model,
        }
    }

    /// Context with sessions stored as JSONL under the workspace.
    pub fn with_workspace_sessions(config: Config, model: Arc<dyn Model>) -> Self {
        let store = Arc::new(JsonlSessionStore::new(config.sessions_dir()));
        Self::new(config, model, store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    /// Freeze the tool set and build the agent loop.
    pub fn into_agent_loop(self) -> AgentLoop {
        let settings = RunnerSettings::from_config(&self.config);
        info!(
            model = %settings.model,
            tools = self.tools.len(),
            max_iterations = settings.max_iterations,
            "building agent loop"
        );
        let runner = TurnRunner::new(self.model, Arc::new(self.tools), settings);
        AgentLoop::new(runner, self.sessions, self.bus)
    }

    /// Build the agent loop and start a dispatcher for it.
    pub fn into_dispatcher(self) -> Arc<Dispatcher> {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(self.into_agent_loop())));
        dispatcher.start();
        dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skein_llm::{ModelOutput, ModelRequest};
    use skein_types::event::Topic;

    use crate::session::MemorySessionStore;

    struct Fixed;

    #[async_trait]
    impl Model for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _r: &ModelRequest) -> skein_llm::Result<ModelOutput> {
            Ok(ModelOutput::text("ok"))
        }
    }

    #[tokio::test]
    async fn dispatcher_subscribes_inbound_and_control() {
        let ctx = AppContext::new(
            Config::default(),
            Arc::new(Fixed),
            Arc::new(MemorySessionStore::new()),
        );
        let bus = Arc::clone(ctx.bus());
        let dispatcher = ctx.into_dispatcher();
        assert_eq!(bus.subscriber_count(Topic::Inbound), 1);
        assert_eq!(bus.subscriber_count(Topic::Internal), 1);

        dispatcher.stop();
        assert_eq!(bus.subscriber_count(Topic::Inbound), 0);
    }

    #[test]
    fn workspace_sessions_context_builds() {
        let mut config = Config::default();
        config.agents.defaults.workspace = "/tmp/skein-ws".into();
        let ctx = AppContext::with_workspace_sessions(config, Arc::new(Fixed));
        assert!(ctx.tools().is_empty());
    }
}
