//! Channel adapters used by the CLI.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use skein_core::ChannelAdapter;
use skein_types::error::SkeinError;
use skein_types::event::Event;

/// Prints replies to stdout and forwards them to the command driving it.
pub struct ConsoleChannel {
    name: String,
    replies: mpsc::UnboundedSender<Event>,
}

impl ConsoleChannel {
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                replies: tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl ChannelAdapter for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &Event) -> Result<(), SkeinError> {
        println!("{}", event.payload.text);
        // The driving command may already have exited.
        let _ = self.replies.send(event.clone());
        Ok(())
    }
}

/// Logs replies to scheduler-driven conversations.
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl ChannelAdapter for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &Event) -> Result<(), SkeinError> {
        let status = event
            .payload
            .data
            .as_ref()
            .and_then(|d| d.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");
        info!(
            channel = %self.name,
            key = %event.conversation_key,
            status,
            reply = %event.payload.text,
            "agent reply"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_forwards_reply() {
        let (console, mut rx) = ConsoleChannel::new("cli");
        let request = Event::inbound("cli", "cli:local", "hi");
        let reply = Event::reply(&request, skein_types::event::Payload::text("hello"));
        console.deliver(&reply).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.correlation_id, request.id);
    }

    #[tokio::test]
    async fn console_tolerates_dropped_receiver() {
        let (console, rx) = ConsoleChannel::new("cli");
        drop(rx);
        let reply = Event::reply(
            &Event::inbound("cli", "k", "x"),
            skein_types::event::Payload::text("y"),
        );
        assert!(console.deliver(&reply).await.is_ok());
    }
}
