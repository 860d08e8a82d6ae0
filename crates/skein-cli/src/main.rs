//! `skein` -- CLI binary for the skein automation agent.
//!
//! Provides the following subcommands:
//!
//! - `skein agent` -- Start an interactive console session or send a single message.
//! - `skein gateway` -- Run the agent loop with the cron and heartbeat services.
//! - `skein cron` -- Manage scheduled jobs.
//! - `skein sessions` -- List and inspect stored sessions.

use clap::{Parser, Subcommand};

mod commands;

/// skein automation agent CLI.
#[derive(Parser)]
#[command(name = "skein", about = "skein automation agent CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start an interactive console session or send a single message.
    Agent(commands::agent::AgentArgs),

    /// Run the agent loop with cron and heartbeat until Ctrl+C.
    Gateway(commands::gateway::GatewayArgs),

    /// Manage scheduled (cron) jobs.
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },

    /// Inspect stored sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionsCmd,
    },
}

/// Subcommands for `skein sessions`.
#[derive(Subcommand)]
enum SessionsCmd {
    /// List all sessions.
    List {
        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Show the turns of one session.
    Inspect {
        /// Conversation key to inspect.
        key: String,

        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },
}

/// Subcommands for `skein cron`.
#[derive(Subcommand)]
enum CronAction {
    /// List all cron jobs.
    List {
        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Add a new cron job.
    Add {
        /// Unique job name.
        #[arg(long)]
        name: String,

        /// Cron expression (e.g. "0 9 * * Mon-Fri").
        #[arg(long)]
        schedule: String,

        /// Message sent to the agent when the job fires.
        #[arg(long)]
        message: String,

        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Remove a cron job by ID.
    Remove {
        /// Job ID to remove.
        job_id: String,

        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Enable a cron job.
    Enable {
        /// Job ID to enable.
        job_id: String,

        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Disable a cron job.
    Disable {
        /// Job ID to disable.
        job_id: String,

        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Run a cron job once, now, and print the agent's reply.
    Run {
        /// Job ID to run.
        job_id: String,

        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Agent(args) => commands::agent::run(args).await?,
        Commands::Gateway(args) => commands::gateway::run(args).await?,
        Commands::Cron { action } => match action {
            CronAction::List { config } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::cron::cron_list(&cfg).await?;
            }
            CronAction::Add {
                name,
                schedule,
                message,
                config,
            } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::cron::cron_add(name, schedule, message, &cfg).await?;
            }
            CronAction::Remove { job_id, config } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::cron::cron_remove(&job_id, &cfg).await?;
            }
            CronAction::Enable { job_id, config } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::cron::cron_enable(&job_id, true, &cfg).await?;
            }
            CronAction::Disable { job_id, config } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::cron::cron_enable(&job_id, false, &cfg).await?;
            }
            CronAction::Run { job_id, config } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::cron::cron_run(&job_id, cfg).await?;
            }
        },
        Commands::Sessions { action } => match action {
            SessionsCmd::List { config } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::sessions::sessions_list(&cfg).await?;
            }
            SessionsCmd::Inspect { key, config } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::sessions::sessions_inspect(&key, &cfg).await?;
            }
        },
    }

    Ok(())
}
