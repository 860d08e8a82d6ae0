//! Cron scheduling against a simulated clock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use skein_core::{MessageBus, handler_fn};
use skein_services::cron_service::storage::{CronStorage, JobOp, JobStore, MemoryJobStore};
use skein_services::{Clock, CronService, ServiceError};
use skein_types::cron::CronJob;
use skein_types::event::{Event, Topic};

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn new(t: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(t)))
    }

    fn set(&self, t: DateTime<Utc>) {
        *self.0.lock() = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

fn at(day: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, day, h, m, s).unwrap()
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
async fn daily_job_fires_once_per_crossing() {
    let (bus, seen) = collecting_bus();
    let clock = ManualClock::new(at(5, 8, 58, 0));
    let svc = CronService::with_clock(Arc::new(MemoryJobStore::new()), Arc::clone(&bus), clock.clone())
        .await
        .unwrap();
    let job = svc.add_job("morning", "0 9 * * *", "daily report").await.unwrap();

    clock.set(at(5, 8, 59, 30));
    assert_eq!(svc.tick().await, 0);

    clock.set(at(5, 9, 0, 5));
    assert_eq!(svc.tick().await, 1);
    assert_eq!(svc.get_job(&job.id).unwrap().last_run, Some(at(5, 9, 0, 0)));

    // Later ticks on the same day do not fire again.
    for (h, m) in [(9, 0), (9, 1), (12, 0), (23, 59)] {
        clock.set(at(5, h, m, 40));
        assert_eq!(svc.tick().await, 0);
    }

    clock.set(at(6, 8, 59, 0));
    assert_eq!(svc.tick().await, 0);
    clock.set(at(6, 9, 0, 1));
    assert_eq!(svc.tick().await, 1);
    assert_eq!(svc.get_job(&job.id).unwrap().last_run, Some(at(6, 9, 0, 0)));

    bus.wait_idle().await;
    let events = seen.lock();
    assert_eq!(events.len(), 2);
    for e in events.iter() {
        assert_eq!(e.source, "cron");
        assert_eq!(e.conversation_key, job.conversation_key());
        assert_eq!(e.payload.text, "daily report");
    }
}

#[tokio::test]
async fn restart_does_not_backfill() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.jsonl");

    let (bus, seen) = collecting_bus();
    let clock = ManualClock::new(at(5, 8, 0, 0));
    let id = {
        let store = Arc::new(CronStorage::new(&path));
        let svc = CronService::with_clock(store, Arc::clone(&bus), clock.clone())
            .await
            .unwrap();
        svc.add_job("morning", "0 9 * * *", "report").await.unwrap().id
    };

    // Two 09:00 occurrences pass while the process is down.
    clock.set(at(7, 10, 0, 0));
    let svc = CronService::with_clock(Arc::new(CronStorage::new(&path)), Arc::clone(&bus), clock.clone())
        .await
        .unwrap();
    let job = svc.get_job(&id).unwrap();
    assert_eq!(job.next_run, Some(at(8, 9, 0, 0)));
    assert_eq!(svc.tick().await, 0);

    clock.set(at(8, 9, 0, 0));
    assert_eq!(svc.tick().await, 1);
    bus.wait_idle().await;
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn management_changes_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.jsonl");
    let bus = Arc::new(MessageBus::new());

    let svc = CronService::open(&path, Arc::clone(&bus)).await.unwrap();
    let a = svc.add_job("a", "*/5 * * * *", "ping").await.unwrap();
    let b = svc.add_job("b", "0 0 9 * * MON-FRI", "standup").await.unwrap();
    svc.enable_job(&a.id, false).await.unwrap();
    svc.remove_job(&b.id).await.unwrap();
    svc.compact().await.unwrap();

    let reloaded = CronService::open(&path, bus).await.unwrap();
    let jobs = reloaded.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, a.id);
    assert!(!jobs[0].enabled);

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 1);
}

#[tokio::test]
async fn unknown_job_operations_fail() {
    let svc = CronService::new(Arc::new(MemoryJobStore::new()), Arc::new(MessageBus::new()))
        .await
        .unwrap();
    assert!(matches!(
        svc.enable_job("job-missing", true).await,
        Err(ServiceError::JobNotFound(_))
    ));
    assert!(matches!(
        svc.run_job_now("job-missing").await,
        Err(ServiceError::JobNotFound(_))
    ));
}

/// Refuses updates for one job name.
struct FlakyStore {
    inner: MemoryJobStore,
    broken_name: String,
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn load(&self) -> skein_services::Result<Vec<CronJob>> {
        self.inner.load().await
    }

    async fn append(&self, op: &JobOp) -> skein_services::Result<()> {
        if let JobOp::Update { job } = op
            && job.name == self.broken_name
        {
            return Err(std::io::Error::other("disk full").into());
        }
        self.inner.append(op).await
    }

    async fn compact(&self, jobs: &[CronJob]) -> skein_services::Result<()> {
        self.inner.compact(jobs).await
    }
}

#[tokio::test]
async fn one_failing_job_does_not_stop_the_tick() {
    let (bus, seen) = collecting_bus();
    let clock = ManualClock::new(at(5, 8, 0, 0));
    let store = Arc::new(FlakyStore {
        inner: MemoryJobStore::new(),
        broken_name: "bad".into(),
    });
    let svc = CronService::with_clock(store, Arc::clone(&bus), clock.clone())
        .await
        .unwrap();
    let bad = svc.add_job("bad", "0 9 * * *", "first").await.unwrap();
    let good = svc.add_job("good", "0 9 * * *", "second").await.unwrap();

    clock.set(at(5, 9, 0, 0));
    assert_eq!(svc.tick().await, 1);
    assert_eq!(svc.get_job(&good.id).unwrap().last_run, Some(at(5, 9, 0, 0)));

    // The event for "bad" went out before the write failed, so its run
    // stays recorded in memory and is not retried within the minute.
    let bad = svc.get_job(&bad.id).unwrap();
    assert_eq!(bad.last_run, Some(at(5, 9, 0, 0)));
    assert_eq!(bad.next_run, Some(at(6, 9, 0, 0)));
    assert_eq!(svc.tick().await, 0);

    bus.wait_idle().await;
    let mut texts: Vec<String> = seen.lock().iter().map(|e| e.payload.text.clone()).collect();
    texts.sort();
    assert_eq!(texts, vec!["first", "second"]);
}

#[tokio::test]
async fn removal_by_another_instance_stops_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.jsonl");
    let (bus, seen) = collecting_bus();
    let clock = ManualClock::new(at(5, 8, 0, 0));

    let gateway = CronService::with_clock(
        Arc::new(CronStorage::new(&path)),
        Arc::clone(&bus),
        clock.clone(),
    )
    .await
    .unwrap();
    let job = gateway.add_job("morning", "0 9 * * *", "report").await.unwrap();

    let cli = CronService::with_clock(
        Arc::new(CronStorage::new(&path)),
        Arc::clone(&bus),
        clock.clone(),
    )
    .await
    .unwrap();
    cli.remove_job(&job.id).await.unwrap();
    cli.compact().await.unwrap();

    clock.set(at(5, 9, 0, 5));
    assert_eq!(gateway.tick().await, 0);
    assert!(gateway.get_job(&job.id).is_none());

    let reloaded = CronService::open(&path, Arc::clone(&bus)).await.unwrap();
    assert!(reloaded.list_jobs().is_empty());

    bus.wait_idle().await;
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn late_update_does_not_revive_removed_job() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.jsonl");
    let bus = Arc::new(MessageBus::new());

    let svc = CronService::open(&path, Arc::clone(&bus)).await.unwrap();
    let job = svc.add_job("morning", "0 9 * * *", "report").await.unwrap();
    svc.remove_job(&job.id).await.unwrap();

    // A stale writer still holding the job records a run afterwards.
    let store = CronStorage::new(&path);
    store.append(&JobOp::Update { job: job.clone() }).await.unwrap();

    let reloaded = CronService::open(&path, bus).await.unwrap();
    assert!(reloaded.list_jobs().is_empty());
}

#[tokio::test]
async fn job_added_by_another_instance_fires() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.jsonl");
    let (bus, seen) = collecting_bus();
    let clock = ManualClock::new(at(5, 8, 0, 0));

    let gateway = CronService::with_clock(
        Arc::new(CronStorage::new(&path)),
        Arc::clone(&bus),
        clock.clone(),
    )
    .await
    .unwrap();
    assert_eq!(gateway.tick().await, 0);

    let cli = CronService::with_clock(
        Arc::new(CronStorage::new(&path)),
        Arc::clone(&bus),
        clock.clone(),
    )
    .await
    .unwrap();
    let job = cli.add_job("morning", "0 9 * * *", "report").await.unwrap();

    clock.set(at(5, 9, 0, 5));
    assert_eq!(gateway.tick().await, 1);
    assert_eq!(gateway.get_job(&job.id).unwrap().last_run, Some(at(5, 9, 0, 0)));

    bus.wait_idle().await;
    assert_eq!(seen.lock().len(), 1);
}
