//! Cron scheduling service.
//!
//! Owns the job set, persists every change through a [`JobStore`] and,
//! on each tick, publishes an inbound event for every due job:
//!
//! - `source` is `"cron"`;
//! - `conversation_key` is `cron:<job id>`, so a job's runs share one
//!   session;
//! - the payload text is the job message, with `job_id` and `job_name`
//!   in the event metadata.
//!
//! Mutations of a job (management calls and the tick) are serialized
//! per job id. Occurrences missed while the process was down are not
//! backfilled: `next_run` is recomputed from the current time at load.
//!
//! Another process may manage jobs in the same log. Each tick first
//! replays the log if its revision changed, so jobs removed elsewhere
//! stop firing and jobs added elsewhere start without a restart.

pub mod scheduler;
pub mod storage;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::RwLock as AsyncRwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ServiceHandle;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, ServiceError};
use scheduler::{CronScheduler, is_due, minute_of, next_after, parse_schedule};
use skein_core::MessageBus;
use skein_core::sync::KeyedLocks;
use skein_types::cron::CronJob;
use skein_types::event::{CRON_SOURCE, Event};
use storage::{CronStorage, JobOp, JobStore, StoreRevision};

/// Default interval between schedule evaluations.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Cron scheduling service.
pub struct CronService {
    scheduler: RwLock<CronScheduler>,
    store: Arc<dyn JobStore>,
    bus: Arc<MessageBus>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
    /// Last store revision replayed. Mutations hold it shared; a reload
    /// holds it exclusively.
    seen: AsyncRwLock<Option<StoreRevision>>,
    tick_interval: Duration,
}

impl CronService {
    /// Load persisted jobs and schedule them from the current time.
    pub async fn new(store: Arc<dyn JobStore>, bus: Arc<MessageBus>) -> Result<Self> {
        Self::with_clock(store, bus, Arc::new(SystemClock)).await
    }

    /// Service backed by a JSONL job log at `path`.
    pub async fn open(path: impl Into<PathBuf>, bus: Arc<MessageBus>) -> Result<Self> {
        Self::new(Arc::new(CronStorage::new(path)), bus).await
    }

    pub async fn with_clock(
        store: Arc<dyn JobStore>,
        bus: Arc<MessageBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let revision = store.revision().await?;
        let mut scheduler = CronScheduler::new();
        for job in store.load().await? {
            let id = job.id.clone();
            if let Err(e) = scheduler.add_job(job) {
                warn!(job_id = %id, error = %e, "skipping invalid persisted job");
            }
        }
        scheduler.reschedule_all(clock.now());
        info!(jobs = scheduler.len(), "cron service loaded");

        Ok(Self {
            scheduler: RwLock::new(scheduler),
            store,
            bus,
            clock,
            locks: KeyedLocks::new(),
            seen: AsyncRwLock::new(revision),
            tick_interval: DEFAULT_TICK,
        })
    }

    /// Set the interval between schedule evaluations.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Add a new job. Returns the stored job with its generated id.
    pub async fn add_job(
        &self,
        name: impl Into<String>,
        schedule: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<CronJob> {
        let (name, schedule, message) = (name.into(), schedule.into(), message.into());
        if name.trim().is_empty() {
            return Err(ServiceError::InvalidJob("name must not be empty".into()));
        }
        if message.trim().is_empty() {
            return Err(ServiceError::InvalidJob("message must not be empty".into()));
        }
        parse_schedule(&schedule)?;

        let now = self.clock.now();
        let job = CronJob {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            next_run: next_after(&schedule, &now)?,
            name,
            schedule,
            message,
            enabled: true,
            last_run: None,
            created_at: now,
            updated_at: now,
        };

        let _seen = self.seen.read().await;
        let _guard = self.locks.lock(&job.id).await;
        self.scheduler.write().add_job(job.clone())?;

        if let Err(e) = self.store.append(&JobOp::Create { job: job.clone() }).await {
            self.scheduler.write().remove_job(&job.id).ok();
            return Err(e);
        }

        info!(job_id = %job.id, name = %job.name, schedule = %job.schedule, "added cron job");
        Ok(job)
    }

    /// All jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<CronJob> {
        self.scheduler.read().list_jobs()
    }

    pub fn get_job(&self, job_id: &str) -> Option<CronJob> {
        self.scheduler.read().get_job(job_id).cloned()
    }

    /// Remove a job by id.
    pub async fn remove_job(&self, job_id: &str) -> Result<()> {
        let _seen = self.seen.read().await;
        let _guard = self.locks.lock(job_id).await;
        let removed = self.scheduler.write().remove_job(job_id)?;

        let op = JobOp::Delete {
            job_id: job_id.to_string(),
        };
        if let Err(e) = self.store.append(&op).await {
            self.scheduler.write().restore(removed);
            return Err(e);
        }

        info!(job_id, "removed cron job");
        Ok(())
    }

    /// Enable or disable a job. Enabling schedules it from now.
    pub async fn enable_job(&self, job_id: &str, enabled: bool) -> Result<CronJob> {
        let _seen = self.seen.read().await;
        let _guard = self.locks.lock(job_id).await;
        let now = self.clock.now();

        let (previous, updated) = {
            let mut sched = self.scheduler.write();
            let job = sched
                .get_job_mut(job_id)
                .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;
            let previous = job.clone();
            if enabled && !job.enabled {
                job.next_run = next_after(&job.schedule, &now)?;
            }
            job.enabled = enabled;
            job.updated_at = now;
            (previous, job.clone())
        };

        if let Err(e) = self.store.append(&JobOp::Update { job: updated.clone() }).await {
            self.scheduler.write().restore(previous);
            return Err(e);
        }

        info!(job_id, enabled, "updated cron job");
        Ok(updated)
    }

    /// Fire a job immediately, whether or not it is enabled or due.
    ///
    /// `last_run` becomes the current minute; `next_run` is unchanged.
    /// The event is already published when the record is written, so a
    /// failed write leaves the in-memory `last_run` advanced.
    pub async fn run_job_now(&self, job_id: &str) -> Result<()> {
        let _seen = self.seen.read().await;
        let _guard = self.locks.lock(job_id).await;
        let now = self.clock.now();
        let job = self
            .get_job(job_id)
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;

        self.publish(&job)?;

        let updated = {
            let mut sched = self.scheduler.write();
            let Some(job) = sched.get_job_mut(job_id) else {
                return Err(ServiceError::JobNotFound(job_id.to_string()));
            };
            job.last_run = Some(minute_of(now));
            job.updated_at = now;
            job.clone()
        };
        self.store.append(&JobOp::Update { job: updated }).await?;
        info!(job_id, "ran cron job on demand");
        Ok(())
    }

    /// Evaluate every job once. Returns how many fired.
    ///
    /// A failing job is logged and does not stop the others.
    pub async fn tick(&self) -> usize {
        if let Err(e) = self.reload_if_changed().await {
            warn!(error = %e, "failed to reload cron jobs");
        }

        let now = self.clock.now();
        let due = self.scheduler.read().due_jobs(now);
        let mut fired = 0;

        for job_id in due {
            match self.fire_if_due(&job_id, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => warn!(job_id = %job_id, error = %e, "cron job failed"),
            }
        }

        if fired > 0 {
            debug!(fired, "cron tick");
        }
        fired
    }

    /// Fire a job if it is still due once its lock is held.
    ///
    /// A write failure after publishing keeps the advanced `next_run` in
    /// memory so the occurrence does not fire twice.
    async fn fire_if_due(&self, job_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let _seen = self.seen.read().await;
        let _guard = self.locks.lock(job_id).await;

        let Some(job) = self.get_job(job_id) else {
            return Ok(false);
        };
        let Some(scheduled) = job.next_run.filter(|_| is_due(&job, now)) else {
            return Ok(false);
        };

        self.publish(&job)?;
        let updated = self.scheduler.write().record_run(job_id, scheduled, now)?;
        info!(
            job_id,
            name = %job.name,
            scheduled = %scheduled,
            next_run = ?updated.next_run,
            "fired cron job"
        );
        self.store.append(&JobOp::Update { job: updated }).await?;
        Ok(true)
    }

    /// Replay the store if another writer changed it since the last
    /// replay. Returns whether a replay happened.
    ///
    /// Jobs the store no longer has are dropped. Stored jobs newer than
    /// the in-memory copy replace it; a `next_run` older than the current
    /// minute is recomputed from now.
    pub async fn reload_if_changed(&self) -> Result<bool> {
        let mut seen = self.seen.write().await;
        let Some(current) = self.store.revision().await? else {
            return Ok(false);
        };
        if *seen == Some(current) {
            return Ok(false);
        }

        let stored = self.store.load().await?;
        *seen = Some(current);

        let now = self.clock.now();
        let live: HashSet<String> = stored.iter().map(|j| j.id.clone()).collect();
        let mut sched = self.scheduler.write();

        let dropped: Vec<String> = sched
            .list_jobs()
            .into_iter()
            .map(|j| j.id)
            .filter(|id| !live.contains(id))
            .collect();
        for id in dropped {
            sched.remove_job(&id).ok();
            info!(job_id = %id, "cron job removed from store");
        }

        for mut job in stored {
            let newer = sched
                .get_job(&job.id)
                .is_none_or(|current| job.updated_at > current.updated_at);
            if !newer {
                continue;
            }
            if job.next_run.is_none_or(|t| t < minute_of(now)) {
                job.next_run = next_after(&job.schedule, &now).ok().flatten();
            }
            let id = job.id.clone();
            match sched.add_job(job) {
                Ok(()) => debug!(job_id = %id, "cron job loaded from store"),
                Err(e) => warn!(job_id = %id, error = %e, "skipping invalid stored job"),
            }
        }

        debug!(jobs = sched.len(), "replayed cron store");
        Ok(true)
    }

    fn publish(&self, job: &CronJob) -> Result<()> {
        let event = Event::inbound(CRON_SOURCE, job.conversation_key(), job.message.clone())
            .with_metadata("job_id", json!(job.id))
            .with_metadata("job_name", json!(job.name));
        self.bus.publish(event)?;
        Ok(())
    }

    /// Rewrite the job log with the live jobs only.
    ///
    /// Changes made by another writer are replayed first so they are
    /// not lost.
    pub async fn compact(&self) -> Result<()> {
        self.reload_if_changed().await?;
        let _seen = self.seen.write().await;
        let jobs = self.list_jobs();
        self.store.compact(&jobs).await
    }

    /// Run the tick loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_ms = self.tick_interval.as_millis() as u64, "cron service started");
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cron service shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Spawn the tick loop. Stop it with [`ServiceHandle::stop`].
    pub fn start(self: &Arc<Self>) -> ServiceHandle {
        let cancel = CancellationToken::new();
        let service = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { service.run(token).await });
        ServiceHandle::new("cron", cancel, task)
    }
}
