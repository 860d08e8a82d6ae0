//! Glue between the bus, the agent loop and channel adapters.
//!
//! The [`Dispatcher`] subscribes:
//!
//! - the [`AgentLoop`] to [`Topic::Inbound`], one turn per event, with a
//!   cancellation token registered per conversation while it runs;
//! - a control handler to [`Topic::Internal`] that cancels the active turn
//!   of a conversation on a cancel request;
//! - each attached [`ChannelAdapter`] to [`Topic::Outbound`], filtered to
//!   events whose `source` is the adapter's name.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use skein_types::event::{Event, Topic};

use crate::agent::loop_core::AgentLoop;
use crate::bus::{HandlerError, MessageBus, SubscriptionId, handler_fn};
use crate::channel::ChannelAdapter;

pub struct Dispatcher {
    bus: Arc<MessageBus>,
    agent: Arc<AgentLoop>,
    active: Arc<DashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl Dispatcher {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self {
            bus: Arc::clone(agent.bus()),
            agent,
            active: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn agent(&self) -> &Arc<AgentLoop> {
        &self.agent
    }

    /// Subscribe the agent loop and the cancel handler.
    pub fn start(&self) {
        let agent = Arc::clone(&self.agent);
        let active = Arc::clone(&self.active);
        let shutdown = self.shutdown.clone();
        let inbound = self.bus.subscribe(
            Topic::Inbound,
            handler_fn(move |event: Event| {
                let agent = Arc::clone(&agent);
                let active = Arc::clone(&active);
                let token = shutdown.child_token();
                async move {
                    let _turn = ActiveTurn::register(active, &event.conversation_key, &token);
                    let result = agent.handle_inbound(event, token).await;
                    result.map(|_| ()).map_err(HandlerError::from)
                }
            }),
        );

        let active = Arc::clone(&self.active);
        let control = self.bus.subscribe(
            Topic::Internal,
            handler_fn(move |event: Event| {
                let active = Arc::clone(&active);
                async move {
                    if event.is_cancel_request() {
                        cancel_active(&active, &event.conversation_key);
                    }
                    Ok(())
                }
            }),
        );

        self.subscriptions.lock().extend([inbound, control]);
        info!("dispatcher started");
    }

    /// Forward outbound events whose `source` matches the adapter name.
    pub fn attach_channel(&self, adapter: Arc<dyn ChannelAdapter>) -> SubscriptionId {
        let name = adapter.name().to_string();
        debug!(channel = %name, "attaching channel adapter");
        let id = self.bus.subscribe(
            Topic::Outbound,
            handler_fn(move |event: Event| {
                let adapter = Arc::clone(&adapter);
                let name = name.clone();
                async move {
                    if event.source != name {
                        return Ok(());
                    }
                    adapter.deliver(&event).await.map_err(HandlerError::from)
                }
            }),
        );
        self.subscriptions.lock().push(id);
        id
    }

    /// Cancel the turn currently running for `conversation_key`.
    pub fn cancel(&self, conversation_key: &str) -> bool {
        cancel_active(&self.active, conversation_key)
    }

    /// Conversations with a turn in progress.
    pub fn active_turns(&self) -> usize {
        self.active.len()
    }

    /// Unsubscribe everything and cancel in-flight turns.
    pub fn stop(&self) {
        for id in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(id);
        }
        self.shutdown.cancel();
        info!("dispatcher stopped");
    }
}

/// Registration of a running turn, removed when the handler finishes
/// or unwinds.
struct ActiveTurn {
    active: Arc<DashMap<String, CancellationToken>>,
    key: String,
}

impl ActiveTurn {
    fn register(
        active: Arc<DashMap<String, CancellationToken>>,
        key: &str,
        token: &CancellationToken,
    ) -> Self {
        active.insert(key.to_string(), token.clone());
        Self {
            active,
            key: key.to_string(),
        }
    }
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}

fn cancel_active(active: &DashMap<String, CancellationToken>, key: &str) -> bool {
    match active.get(key) {
        Some(token) => {
            info!(key, "cancelling active turn");
            token.cancel();
            true
        }
        None => {
            debug!(key, "cancel requested but no turn is active");
            false
        }
    }
}
