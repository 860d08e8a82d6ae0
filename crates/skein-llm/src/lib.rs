//! # skein-llm
//!
//! The model interface boundary. The agent loop only sees the [`Model`]
//! trait and its two tagged outcomes; [`OpenAiCompatModel`] is the HTTP
//! implementation used by the CLI, and [`retry`] adds bounded
//! exponential backoff with per-call timeouts.

pub mod error;
pub mod model;
pub mod openai_compat;
pub mod retry;

pub use error::{ModelError, Result};
pub use model::{Model, ModelOutput, ModelRequest};
pub use openai_compat::OpenAiCompatModel;
pub use retry::{CallError, RetryConfig, complete_with_retry};
