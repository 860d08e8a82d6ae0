//! # skein-types
//!
//! Core type definitions for skein.
//!
//! This crate is the foundation of the dependency graph -- all other
//! skein crates depend on it. It contains:
//!
//! - **[`event`]** -- the [`Event`](event::Event) envelope and its topics
//! - **[`session`]** -- conversation sessions and turns
//! - **[`tool`]** -- tool calls, results and schemas
//! - **[`cron`]** -- scheduled job records
//! - **[`config`]** -- configuration schema
//! - **[`error`]** -- [`SkeinError`] and [`DeliveryError`]

pub mod config;
pub mod cron;
pub mod error;
pub mod event;
pub mod session;
pub mod tool;

pub use error::{DeliveryError, Result, SkeinError};
