//! Channel adapter boundary.
//!
//! A channel adapter turns platform messages into inbound [`Event`]s
//! (publishing them on the bus itself) and renders outbound events back
//! to the platform. The core only needs a stable [`name`](ChannelAdapter::name),
//! which must equal the `source` of the events the adapter publishes.

use async_trait::async_trait;

use skein_types::error::SkeinError;
use skein_types::event::Event;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Source identifier this adapter publishes under.
    fn name(&self) -> &str;

    /// Render one outbound event to the platform.
    async fn deliver(&self, event: &Event) -> Result<(), SkeinError>;
}
