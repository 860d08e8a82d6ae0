//! Heartbeat service.
//!
//! On a fixed interval, reads the workspace note file and, if it lists
//! pending work, publishes its content as an inbound event with
//! `source = "heartbeat"` and the reserved `"heartbeat"` conversation
//! key, so heartbeat-driven turns keep their own history.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ServiceHandle;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use skein_core::MessageBus;
use skein_types::config::Config;
use skein_types::event::{Event, HEARTBEAT_CONVERSATION_KEY, HEARTBEAT_SOURCE};

/// Process-wide heartbeat state, owned by the service.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    pub interval: Duration,
    /// When a heartbeat event was last published.
    pub last_fire: Option<DateTime<Utc>>,
    pub note_path: PathBuf,
}

/// A service that turns pending notes into heartbeat events.
pub struct HeartbeatService {
    state: Mutex<HeartbeatState>,
    bus: Arc<MessageBus>,
    clock: Arc<dyn Clock>,
}

impl HeartbeatService {
    pub fn new(interval: Duration, note_path: impl Into<PathBuf>, bus: Arc<MessageBus>) -> Self {
        Self {
            state: Mutex::new(HeartbeatState {
                interval: interval.max(Duration::from_millis(10)),
                last_fire: None,
                note_path: note_path.into(),
            }),
            bus,
            clock: Arc::new(SystemClock),
        }
    }

    /// Interval and note file from `heartbeat.*`.
    pub fn from_config(config: &Config, bus: Arc<MessageBus>) -> Self {
        Self::new(
            Duration::from_secs(config.heartbeat.interval_minutes.max(1) * 60),
            config.heartbeat_note_path(),
            bus,
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> HeartbeatState {
        self.state.lock().clone()
    }

    /// Check the note once. Returns whether an event was published.
    ///
    /// A missing note file means there is nothing to do.
    pub async fn tick(&self) -> Result<bool> {
        let path = self.state.lock().note_path.clone();
        let Some(content) = read_note(&path).await? else {
            debug!(path = %path.display(), "no heartbeat note");
            return Ok(false);
        };

        if !has_pending_work(&content) {
            debug!("heartbeat note has no pending work");
            return Ok(false);
        }

        let event = Event::inbound(
            HEARTBEAT_SOURCE,
            HEARTBEAT_CONVERSATION_KEY,
            content.trim().to_string(),
        );
        self.bus.publish(event)?;

        let now = self.clock.now();
        self.state.lock().last_fire = Some(now);
        info!(at = %now, "heartbeat fired");
        Ok(true)
    }

    /// Run until `cancel` fires. The first beat happens after one full
    /// interval.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.state.lock().interval;
        info!(interval_secs = period.as_secs(), "heartbeat service started");

        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("heartbeat service shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "heartbeat failed");
                    }
                }
            }
        }
    }

    /// Spawn the heartbeat loop. Stop it with [`ServiceHandle::stop`].
    pub fn start(self: &Arc<Self>) -> ServiceHandle {
        let cancel = CancellationToken::new();
        let service = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { service.run(token).await });
        ServiceHandle::new("heartbeat", cancel, task)
    }
}

async fn read_note(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether a note lists anything to act on.
///
/// Blank lines, Markdown headings, HTML comments and checkbox items
/// with no text do not count. Text on the same line as a comment,
/// before it opens or after it closes, does.
pub fn has_pending_work(content: &str) -> bool {
    let mut in_comment = false;

    for raw in content.lines() {
        let (visible, still_open) = strip_comments(raw, in_comment);
        in_comment = still_open;

        let line = visible.trim();
        if line.is_empty() || line.starts_with('#') || is_empty_checkbox(line) {
            continue;
        }
        return true;
    }
    false
}

/// Remove `<!-- ... -->` spans from one line. `in_comment` says whether
/// the line starts inside a comment; the returned flag says whether it
/// ends inside one.
fn strip_comments(line: &str, mut in_comment: bool) -> (String, bool) {
    let mut visible = String::new();
    let mut rest = line;

    loop {
        if in_comment {
            let Some(end) = rest.find("-->") else {
                return (visible, true);
            };
            rest = &rest[end + 3..];
            in_comment = false;
        } else {
            let Some(start) = rest.find("<!--") else {
                visible.push_str(rest);
                return (visible, false);
            };
            visible.push_str(&rest[..start]);
            rest = &rest[start + 4..];
            in_comment = true;
        }
    }
}

fn is_empty_checkbox(line: &str) -> bool {
    ["- [ ]", "* [ ]", "- [x]", "* [x]", "- [X]", "* [X]"]
        .iter()
        .any(|marker| line.strip_prefix(marker).is_some_and(|rest| rest.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::handler_fn;
    use skein_types::event::Topic;

    #[test]
    fn empty_template_has_no_work() {
        let note = "# Heartbeat\n\n<!-- add tasks below -->\n\n## Tasks\n- [ ]\n* [ ]\n";
        assert!(!has_pending_work(note));
        assert!(!has_pending_work(""));
    }

    #[test]
    fn multiline_comment_is_ignored() {
        let note = "<!--\nCheck the deploy\n-->\n# Tasks\n";
        assert!(!has_pending_work(note));
    }

    #[test]
    fn text_beside_a_comment_counts() {
        assert!(has_pending_work("<!-- note --> check backups\n"));
        assert!(has_pending_work("<!--\nold notes\n--> rotate keys\n"));
        assert!(has_pending_work("renew certs <!-- soon -->\n"));
        assert!(!has_pending_work("<!-- a --> <!-- b -->\n<!-- c\n-->\n"));
    }

    #[test]
    fn task_text_counts_as_work() {
        assert!(has_pending_work("# Tasks\n- [ ] water the plants\n"));
        assert!(has_pending_work("Check the inbox"));
    }

    fn collecting_bus() -> (Arc<MessageBus>, Arc<Mutex<Vec<Event>>>) {
        let bus = Arc::new(MessageBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            Topic::Inbound,
            handler_fn(move |e: Event| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(e);
                    Ok(())
                }
            }),
        );
        (bus, seen)
    }

    #[tokio::test]
    async fn publishes_pending_note() {
        let dir = tempfile::tempdir().unwrap();
        let note = dir.path().join("HEARTBEAT.md");
        tokio::fs::write(&note, "# Tasks\n- [ ] summarize news\n").await.unwrap();

        let (bus, seen) = collecting_bus();
        let svc = HeartbeatService::new(Duration::from_secs(60), &note, Arc::clone(&bus));
        assert!(svc.tick().await.unwrap());
        bus.wait_idle().await;

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "heartbeat");
        assert_eq!(events[0].conversation_key, "heartbeat");
        assert!(events[0].payload.text.contains("summarize news"));
        assert!(svc.state().last_fire.is_some());
    }

    #[tokio::test]
    async fn missing_or_empty_note_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let note = dir.path().join("HEARTBEAT.md");
        let (bus, seen) = collecting_bus();
        let svc = HeartbeatService::new(Duration::from_secs(60), &note, Arc::clone(&bus));

        assert!(!svc.tick().await.unwrap());
        tokio::fs::write(&note, "# Heartbeat\n- [ ]\n").await.unwrap();
        assert!(!svc.tick().await.unwrap());

        bus.wait_idle().await;
        assert!(seen.lock().is_empty());
        assert!(svc.state().last_fire.is_none());
    }

    #[tokio::test]
    async fn start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let note = dir.path().join("HEARTBEAT.md");
        tokio::fs::write(&note, "ping").await.unwrap();

        let (bus, seen) = collecting_bus();
        let svc = Arc::new(HeartbeatService::new(
            Duration::from_millis(20),
            &note,
            Arc::clone(&bus),
        ));
        let handle = svc.start();
        tokio::time::sleep(Duration::from_millis(90)).await;
        handle.stop().await;
        bus.wait_idle().await;

        let fired = seen.lock().len();
        assert!(fired >= 1, "expected at least one beat, got {fired}");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(seen.lock().len(), fired);
    }
}
