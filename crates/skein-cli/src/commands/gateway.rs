//! `skein gateway` -- long-running agent with scheduler services.
//!
//! Starts the dispatcher, the cron service (when `cron.enabled`) and the
//! heartbeat service (when `heartbeat.enabled`), then waits for Ctrl+C.
//! Replies to cron and heartbeat conversations are logged.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use skein_services::{CronService, HeartbeatService};
use skein_types::event::{CRON_SOURCE, HEARTBEAT_SOURCE};

use super::channel::LogChannel;
use super::{build_context, load_config};

/// Arguments for the `skein gateway` subcommand.
#[derive(Args)]
pub struct GatewayArgs {
    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Run the gateway until Ctrl+C.
pub async fn run(args: GatewayArgs) -> anyhow::Result<()> {
    info!("starting skein gateway");
    let config = load_config(args.config.as_deref())?;

    let ctx = build_context(&config)?;
    let bus = Arc::clone(ctx.bus());
    let dispatcher = ctx.into_dispatcher();
    dispatcher.attach_channel(Arc::new(LogChannel::new(CRON_SOURCE)));
    dispatcher.attach_channel(Arc::new(LogChannel::new(HEARTBEAT_SOURCE)));

    let mut services = Vec::new();

    if config.cron.enabled {
        let path = config.cron_store_path();
        let cron = CronService::open(&path, Arc::clone(&bus))
            .await
            .map_err(|e| anyhow::anyhow!("failed to open cron store at {}: {e}", path.display()))?
            .with_tick_interval(Duration::from_secs(config.cron.tick_seconds.max(1)));
        info!(jobs = cron.list_jobs().len(), "cron service initialized");
        services.push(Arc::new(cron).start());
    }

    if config.heartbeat.enabled {
        let heartbeat = Arc::new(HeartbeatService::from_config(&config, Arc::clone(&bus)));
        info!(
            note = %config.heartbeat_note_path().display(),
            interval_minutes = config.heartbeat.interval_minutes,
            "heartbeat service initialized"
        );
        services.push(heartbeat.start());
    }

    info!(services = services.len(), "gateway running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");

    for service in services {
        service.stop().await;
    }

    if tokio::time::timeout(Duration::from_secs(30), bus.wait_idle())
        .await
        .is_err()
    {
        warn!("in-flight turns did not finish, cancelling");
    }
    dispatcher.stop();
    bus.close();

    let failures = bus.delivery_failures();
    if failures > 0 {
        warn!(failures, "delivery failures during this run");
    }
    info!("gateway shutdown complete");
    Ok(())
}
