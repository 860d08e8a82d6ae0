//! In-memory cron scheduler.
//!
//! Holds the current [`CronJob`] set and decides which jobs are due
//! based on their `next_run`. Expressions are accepted in the standard
//! 5-field form (`min hour dom month dow`) as well as the 6-field
//! (with seconds) and 7-field (with year) forms of the `cron` crate.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use cron::Schedule;

use crate::error::{Result, ServiceError};
use skein_types::cron::CronJob;

/// Expand an expression to the 7-field form the `cron` crate parses.
pub fn normalize_cron_expr(expr: &str) -> Result<String> {
    let expr = expr.trim();
    match expr.split_whitespace().count() {
        5 => Ok(format!("0 {expr} *")),
        6 => Ok(format!("{expr} *")),
        7 => Ok(expr.to_string()),
        n => Err(ServiceError::InvalidCronExpression(format!(
            "expected 5, 6 or 7 fields, got {n}: {expr:?}"
        ))),
    }
}

/// Parse a 5, 6 or 7-field expression.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let normalized = normalize_cron_expr(expr)?;
    Schedule::from_str(&normalized)
        .map_err(|e| ServiceError::InvalidCronExpression(format!("{expr:?}: {e}")))
}

/// First occurrence strictly after `after`, or `None` if the schedule
/// has no further occurrences.
pub fn next_after(expr: &str, after: &DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    Ok(parse_schedule(expr)?.after(after).next())
}

/// Truncate to the start of the minute.
pub fn minute_of(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::minutes(1)).unwrap_or(t)
}

/// In-memory scheduler holding all jobs.
#[derive(Debug, Default)]
pub struct CronScheduler {
    jobs: HashMap<String, CronJob>,
}

impl CronScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job.
    ///
    /// Validates the expression and rejects names already used by
    /// another job.
    pub fn add_job(&mut self, job: CronJob) -> Result<()> {
        parse_schedule(&job.schedule)?;

        if self
            .jobs
            .values()
            .any(|j| j.name == job.name && j.id != job.id)
        {
            return Err(ServiceError::DuplicateJobName(job.name.clone()));
        }

        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Remove a job by id, returning it.
    pub fn remove_job(&mut self, job_id: &str) -> Result<CronJob> {
        self.jobs
            .remove(job_id)
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))
    }

    /// Put a job back unconditionally (rollback of a failed removal).
    pub fn restore(&mut self, job: CronJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn get_job(&self, job_id: &str) -> Option<&CronJob> {
        self.jobs.get(job_id)
    }

    pub fn get_job_mut(&mut self, job_id: &str) -> Option<&mut CronJob> {
        self.jobs.get_mut(job_id)
    }

    /// All jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Ids of enabled jobs whose `next_run` is at or before `now`.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<&CronJob> = self
            .jobs
            .values()
            .filter(|j| is_due(j, now))
            .collect();
        due.sort_by_key(|j| j.next_run);
        due.into_iter().map(|j| j.id.clone()).collect()
    }

    /// Recompute every job's `next_run` from `now`.
    ///
    /// Occurrences between a job's old `next_run` and `now` are dropped,
    /// so downtime is never backfilled.
    pub fn reschedule_all(&mut self, now: DateTime<Utc>) {
        for job in self.jobs.values_mut() {
            job.next_run = next_after(&job.schedule, &now).ok().flatten();
        }
    }

    /// Record a firing for the occurrence scheduled at `scheduled` and
    /// compute the following occurrence.
    ///
    /// The next run is never in the same minute as `scheduled`, which
    /// keeps sub-minute expressions to at most one firing per minute.
    pub fn record_run(
        &mut self,
        job_id: &str,
        scheduled: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CronJob> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;

        let fired_minute = minute_of(scheduled);
        let floor = fired_minute + Duration::seconds(59);
        let after = if now > floor { now } else { floor };

        job.last_run = Some(fired_minute);
        job.next_run = next_after(&job.schedule, &after)?;
        job.updated_at = now;
        Ok(job.clone())
    }
}

/// Whether `job` should fire at `now`.
pub fn is_due(job: &CronJob, now: DateTime<Utc>) -> bool {
    job.enabled && job.next_run.is_some_and(|next| next <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, h, m, s).unwrap()
    }

    fn job(id: &str, name: &str, schedule: &str) -> CronJob {
        CronJob {
            id: id.into(),
            name: name.into(),
            schedule: schedule.into(),
            message: "go".into(),
            enabled: true,
            last_run: None,
            next_run: None,
            created_at: at(0, 0, 0),
            updated_at: at(0, 0, 0),
        }
    }

    #[test]
    fn normalizes_field_counts() {
        assert_eq!(normalize_cron_expr("0 9 * * *").unwrap(), "0 0 9 * * * *");
        assert_eq!(normalize_cron_expr("30 0 9 * * *").unwrap(), "30 0 9 * * * *");
        assert_eq!(normalize_cron_expr("0 0 9 * * * 2026").unwrap(), "0 0 9 * * * 2026");
        assert!(normalize_cron_expr("* *").is_err());
        assert!(normalize_cron_expr("").is_err());
    }

    #[test]
    fn next_after_five_field() {
        let next = next_after("0 9 * * *", &at(8, 59, 30)).unwrap().unwrap();
        assert_eq!(next, at(9, 0, 0));

        let next = next_after("0 9 * * *", &at(9, 0, 0)).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 6, 9, 0, 0).unwrap());
    }

    #[test]
    fn rejects_bad_expression() {
        assert!(matches!(
            parse_schedule("61 * * * *"),
            Err(ServiceError::InvalidCronExpression(_))
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut sched = CronScheduler::new();
        sched.add_job(job("a", "daily", "0 9 * * *")).unwrap();
        let err = sched.add_job(job("b", "daily", "0 10 * * *")).unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateJobName(n) if n == "daily"));

        // Re-adding the same id under its own name is an update.
        sched.add_job(job("a", "daily", "0 8 * * *")).unwrap();
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn due_jobs_respects_enabled_and_time() {
        let mut sched = CronScheduler::new();
        let mut a = job("a", "a", "0 9 * * *");
        a.next_run = Some(at(9, 0, 0));
        let mut b = job("b", "b", "0 9 * * *");
        b.next_run = Some(at(9, 0, 0));
        b.enabled = false;
        let mut c = job("c", "c", "0 10 * * *");
        c.next_run = Some(at(10, 0, 0));
        for j in [a, b, c] {
            sched.add_job(j).unwrap();
        }

        assert!(sched.due_jobs(at(8, 59, 59)).is_empty());
        assert_eq!(sched.due_jobs(at(9, 0, 1)), vec!["a".to_string()]);
    }

    #[test]
    fn record_run_sets_minute_and_next() {
        let mut sched = CronScheduler::new();
        sched.add_job(job("a", "a", "0 9 * * *")).unwrap();
        let updated = sched.record_run("a", at(9, 0, 0), at(9, 0, 42)).unwrap();
        assert_eq!(updated.last_run, Some(at(9, 0, 0)));
        assert_eq!(
            updated.next_run,
            Some(Utc.with_ymd_and_hms(2026, 1, 6, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn sub_minute_schedule_fires_once_per_minute() {
        let mut sched = CronScheduler::new();
        sched.add_job(job("a", "a", "*/10 * * * * *")).unwrap();
        let updated = sched.record_run("a", at(9, 0, 10), at(9, 0, 10)).unwrap();
        assert_eq!(updated.last_run, Some(at(9, 0, 0)));
        assert_eq!(updated.next_run, Some(at(9, 1, 0)));
    }

    #[test]
    fn reschedule_drops_missed_occurrences() {
        let mut sched = CronScheduler::new();
        let mut a = job("a", "a", "0 * * * *");
        a.next_run = Some(at(1, 0, 0));
        sched.add_job(a).unwrap();

        sched.reschedule_all(at(5, 30, 0));
        assert_eq!(sched.get_job("a").unwrap().next_run, Some(at(6, 0, 0)));
        assert!(sched.due_jobs(at(5, 30, 0)).is_empty());
    }
}
