//! Scheduled job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled job.
///
/// Created and removed through the management operations; `last_run`
/// and `next_run` are only written by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    /// Unique id (`job-<uuid>`).
    pub id: String,

    /// Human-readable, unique name.
    pub name: String,

    /// Cron expression as entered (5, 6 or 7 fields).
    pub schedule: String,

    /// Message published as the inbound payload when the job fires.
    pub message: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// The scheduled minute of the last firing.
    #[serde(default, alias = "lastRun")]
    pub last_run: Option<DateTime<Utc>>,

    /// Next time the job is due. Recomputed at load, never backfilled.
    #[serde(default, alias = "nextRun")]
    pub next_run: Option<DateTime<Utc>>,

    #[serde(default = "Utc::now", alias = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now", alias = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl CronJob {
    /// Conversation key cron-triggered turns accumulate under.
    pub fn conversation_key(&self) -> String {
        format!("cron:{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_derives_from_id() {
        let now = Utc::now();
        let job = CronJob {
            id: "job-1".into(),
            name: "daily".into(),
            schedule: "0 9 * * *".into(),
            message: "report".into(),
            enabled: true,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(job.conversation_key(), "cron:job-1");
    }

    #[test]
    fn deserialize_with_defaults_and_aliases() {
        let json = r#"{
            "id": "job-2",
            "name": "n",
            "schedule": "*/5 * * * *",
            "message": "m",
            "lastRun": "2026-01-05T09:00:00Z"
        }"#;
        let job: CronJob = serde_json::from_str(json).unwrap();
        assert!(job.enabled);
        assert!(job.last_run.is_some());
        assert!(job.next_run.is_none());
    }
}
