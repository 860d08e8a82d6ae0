//! Background services for skein.
//!
//! - [`cron_service`]: scheduled jobs published as inbound events.
//! - [`heartbeat`]: periodic wake-ups driven by a workspace note.
//!
//! Both services own their state, take their storage and bus as
//! injected dependencies, and have an explicit `start` / `stop`
//! lifecycle through [`ServiceHandle`].

pub mod clock;
pub mod cron_service;
pub mod error;
pub mod heartbeat;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use clock::{Clock, SystemClock};
pub use cron_service::CronService;
pub use error::{Result, ServiceError};
pub use heartbeat::HeartbeatService;

/// A running background service.
pub struct ServiceHandle {
    name: &'static str,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    pub(crate) fn new(name: &'static str, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { name, cancel, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Token that stops the service when cancelled.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal the service and wait for its loop to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        match self.task.await {
            Ok(()) => debug!(service = self.name, "service stopped"),
            Err(e) => warn!(service = self.name, error = %e, "service task ended abnormally"),
        }
    }
}
