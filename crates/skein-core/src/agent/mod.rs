//! Agent subsystem.
//!
//! - [`runner`]: the per-turn think/act/observe state machine.
//! - [`loop_core`]: the bus-facing [`AgentLoop`](loop_core::AgentLoop)
//!   that owns session locking, persistence and replies.

pub mod loop_core;
pub mod runner;
