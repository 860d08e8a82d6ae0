//! `skein cron` -- manage scheduled jobs.
//!
//! Jobs live in the JSONL log at `cron.storePath`, shared with the
//! [`CronService`] a running gateway uses.
//!
//! # Examples
//!
//! ```text
//! skein cron list
//! skein cron add --name "daily report" --schedule "0 9 * * *" --message "Generate report"
//! skein cron remove job-abc123
//! skein cron enable job-abc123
//! skein cron disable job-abc123
//! skein cron run job-abc123
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use comfy_table::{Table, presets::UTF8_FULL};

use skein_core::MessageBus;
use skein_services::CronService;
use skein_types::config::Config;
use skein_types::cron::CronJob;
use skein_types::event::CRON_SOURCE;

use super::build_context;
use super::channel::ConsoleChannel;

async fn open_service(config: &Config, bus: Arc<MessageBus>) -> anyhow::Result<CronService> {
    let path = config.cron_store_path();
    CronService::open(&path, bus)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load cron store at {}: {e}", path.display()))
}

/// Format a timestamp, or "-" if `None`.
fn format_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into())
}

fn jobs_table(jobs: &[CronJob]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["ID", "NAME", "SCHEDULE", "ENABLED", "LAST RUN", "NEXT RUN"]);
    for job in jobs {
        table.add_row([
            job.id.clone(),
            job.name.clone(),
            job.schedule.clone(),
            if job.enabled { "yes" } else { "no" }.to_string(),
            format_ts(job.last_run),
            format_ts(job.next_run),
        ]);
    }
    table
}

/// List all cron jobs in a table.
pub async fn cron_list(config: &Config) -> anyhow::Result<()> {
    let service = open_service(config, Arc::new(MessageBus::new())).await?;
    let jobs = service.list_jobs();
    if jobs.is_empty() {
        println!("No cron jobs.");
        println!("  Store: {}", config.cron_store_path().display());
        return Ok(());
    }
    println!("{}", jobs_table(&jobs));
    Ok(())
}

/// Create a job.
pub async fn cron_add(
    name: String,
    schedule: String,
    message: String,
    config: &Config,
) -> anyhow::Result<()> {
    let service = open_service(config, Arc::new(MessageBus::new())).await?;
    let job = service.add_job(name, schedule, message).await?;
    println!("Created job {} ({})", job.id, job.name);
    println!("  Next run: {}", format_ts(job.next_run));
    Ok(())
}

/// Delete a job.
pub async fn cron_remove(job_id: &str, config: &Config) -> anyhow::Result<()> {
    let service = open_service(config, Arc::new(MessageBus::new())).await?;
    service.remove_job(job_id).await?;
    service.compact().await?;
    println!("Removed job {job_id}");
    Ok(())
}

/// Enable or disable a job.
pub async fn cron_enable(job_id: &str, enabled: bool, config: &Config) -> anyhow::Result<()> {
    let service = open_service(config, Arc::new(MessageBus::new())).await?;
    let job = service.enable_job(job_id, enabled).await?;
    let state = if enabled { "Enabled" } else { "Disabled" };
    println!("{state} job {} ({})", job.id, job.name);
    Ok(())
}

/// Fire a job through a local agent loop and print the reply.
pub async fn cron_run(job_id: &str, config: Config) -> anyhow::Result<()> {
    let ctx = build_context(&config)?;
    let bus = Arc::clone(ctx.bus());
    let dispatcher = ctx.into_dispatcher();
    let (console, mut replies) = ConsoleChannel::new(CRON_SOURCE);
    dispatcher.attach_channel(Arc::new(console));

    let service = open_service(&config, Arc::clone(&bus)).await?;
    service.run_job_now(job_id).await?;

    if replies.recv().await.is_none() {
        eprintln!("error: no response from agent");
    }
    dispatcher.stop();
    Ok(())
}
