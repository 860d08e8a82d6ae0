//! # skein-core
//!
//! Event routing and agent-loop orchestration for skein.
//!
//! - [`bus`]: topic publish/subscribe with per-conversation FIFO delivery
//!   and contained handler failures.
//! - [`session`]: session stores and the per-key [`SessionManager`].
//! - [`tools`]: the [`Tool`](tools::registry::Tool) trait and the
//!   validating [`ToolRegistry`](tools::registry::ToolRegistry).
//! - [`agent`]: the turn state machine and the bus-facing agent loop.
//! - [`dispatcher`]: wires the agent loop and channel adapters to the bus.
//! - [`bootstrap`]: builds everything from a [`Config`](skein_types::config::Config).

pub mod agent;
pub mod bootstrap;
pub mod bus;
pub mod channel;
pub mod dispatcher;
pub mod security;
pub mod session;
pub mod sync;
pub mod tools;

pub use agent::loop_core::AgentLoop;
pub use agent::runner::{RunnerSettings, TurnFailure, TurnOutcome, TurnRunner, TurnStatus};
pub use bus::{EventHandler, HandlerError, MessageBus, SubscriptionId, handler_fn};
pub use channel::ChannelAdapter;
pub use dispatcher::Dispatcher;
pub use session::{JsonlSessionStore, MemorySessionStore, SessionManager, SessionStore};
