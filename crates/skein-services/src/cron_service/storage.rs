//! Persistence for cron jobs.
//!
//! [`CronStorage`] keeps an append-only JSONL log of [`JobOp`] records.
//! On load the log is replayed to reconstruct the active job set;
//! [`JobStore::compact`] rewrites it as one `create` per live job via a
//! temporary file and a rename.
//!
//! Several processes may share one log (a running gateway and the CLI).
//! [`JobStore::revision`] lets a long-lived owner notice writes made by
//! another process and replay the log again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::Result;
use skein_types::cron::CronJob;

/// A record in the job log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOp {
    /// A new job was created.
    Create { job: CronJob },
    /// An existing job changed; the record carries the full job.
    Update { job: CronJob },
    /// A job was deleted.
    Delete { job_id: String },
}

/// Identifies one state of a job log. Two different values mean the
/// log changed in between.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreRevision {
    len: u64,
    modified: Option<SystemTime>,
}

/// Durable storage for cron jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All live jobs.
    async fn load(&self) -> Result<Vec<CronJob>>;

    /// Current revision of the stored history, or `None` when only this
    /// process can write to the store.
    async fn revision(&self) -> Result<Option<StoreRevision>> {
        Ok(None)
    }

    /// Record one change.
    async fn append(&self, op: &JobOp) -> Result<()>;

    /// Replace the stored history with exactly `jobs`.
    async fn compact(&self, jobs: &[CronJob]) -> Result<()>;
}

/// JSONL append-only storage.
pub struct CronStorage {
    path: PathBuf,
}

impl CronStorage {
    /// Create a storage instance backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for CronStorage {
    /// Replay the log. Invalid lines are skipped with a warning.
    async fn load(&self) -> Result<Vec<CronJob>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(replay(&content))
    }

    async fn revision(&self) -> Result<Option<StoreRevision>> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(Some(StoreRevision {
                len: meta.len(),
                modified: meta.modified().ok(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Some(StoreRevision::default()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append(&self, op: &JobOp) -> Result<()> {
        self.ensure_parent().await?;

        let mut line = serde_json::to_string(op)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn compact(&self, jobs: &[CronJob]) -> Result<()> {
        self.ensure_parent().await?;

        let mut out = String::new();
        for job in jobs {
            out.push_str(&serde_json::to_string(&JobOp::Create { job: job.clone() })?);
            out.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, out.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), jobs = jobs.len(), "compacted cron log");
        Ok(())
    }
}

/// Rebuild the live job set from log content.
///
/// An `update` only applies to a job that is live at that point of the
/// log, so a late write for a deleted job cannot bring it back.
fn replay(content: &str) -> Vec<CronJob> {
    let mut jobs = HashMap::<String, CronJob>::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<JobOp>(line) {
            Ok(JobOp::Create { job }) => {
                jobs.insert(job.id.clone(), job);
            }
            Ok(JobOp::Update { job }) => match jobs.get_mut(&job.id) {
                Some(slot) => *slot = job,
                None => debug!(job_id = %job.id, "ignoring update for a deleted job"),
            },
            Ok(JobOp::Delete { job_id }) => {
                jobs.remove(&job_id);
            }
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping invalid JSONL line");
            }
        }
    }

    jobs.into_values().collect()
}

/// Job storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, CronJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self) -> Result<Vec<CronJob>> {
        Ok(self.jobs.lock().values().cloned().collect())
    }

    async fn append(&self, op: &JobOp) -> Result<()> {
        let mut jobs = self.jobs.lock();
        match op {
            JobOp::Create { job } => {
                jobs.insert(job.id.clone(), job.clone());
            }
            JobOp::Update { job } => {
                if let Some(slot) = jobs.get_mut(&job.id) {
                    *slot = job.clone();
                }
            }
            JobOp::Delete { job_id } => {
                jobs.remove(job_id);
            }
        }
        Ok(())
    }

    async fn compact(&self, jobs: &[CronJob]) -> Result<()> {
        let mut stored = self.jobs.lock();
        stored.clear();
        stored.extend(jobs.iter().map(|j| (j.id.clone(), j.clone())));
        Ok(())
    }
}
