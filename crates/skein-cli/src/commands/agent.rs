//! `skein agent` -- interactive console session or single-message mode.
//!
//! In single-message mode (`--message "..."`), publishes one inbound
//! event, prints the reply and exits. In interactive mode, every line
//! read from stdin is published as an inbound event on the same
//! conversation key; `/stop` or `/cancel` cancels the running turn and
//! `/exit` quits.
//!
//! # Examples
//!
//! ```text
//! skein agent -m "What is Rust?"
//!
//! skein agent
//! > What is Rust?
//! [agent response]
//! > /exit
//! ```

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use skein_core::MessageBus;
use skein_types::event::{Event, is_cancel_command};

use super::channel::ConsoleChannel;
use super::{build_context, load_config};

/// Source name of console-originated events.
pub const CLI_SOURCE: &str = "cli";

/// Arguments for the `skein agent` subcommand.
#[derive(Args)]
pub struct AgentArgs {
    /// Send a single message and exit (non-interactive mode).
    #[arg(short, long)]
    pub message: Option<String>,

    /// Model to use (overrides config).
    #[arg(long)]
    pub model: Option<String>,

    /// Conversation key for this console.
    #[arg(long, default_value = "cli:local")]
    pub session: String,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Run the agent command.
pub async fn run(args: AgentArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(ref model) = args.model {
        config.agents.defaults.model = model.clone();
    }
    info!(model = %config.agents.defaults.model, "initializing agent");

    let ctx = build_context(&config)?;
    let bus = Arc::clone(ctx.bus());
    let dispatcher = ctx.into_dispatcher();

    let (console, mut replies) = ConsoleChannel::new(CLI_SOURCE);
    dispatcher.attach_channel(Arc::new(console));

    if let Some(message) = args.message {
        bus.publish(Event::inbound(CLI_SOURCE, &args.session, message))?;
        if replies.recv().await.is_none() {
            eprintln!("error: no response from agent");
        }
        dispatcher.stop();
        return Ok(());
    }

    println!("skein console (session {}). /stop cancels, /exit quits.", args.session);
    prompt();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    prompt();
                    continue;
                }
                if matches!(line, "/exit" | "/quit") {
                    break;
                }
                let event = if is_cancel_command(line) {
                    Event::cancel_request(CLI_SOURCE, &args.session)
                } else {
                    Event::inbound(CLI_SOURCE, &args.session, line)
                };
                bus.publish(event)?;
            }
            Some(_) = replies.recv() => prompt(),
        }
    }

    shutdown(&bus).await;
    dispatcher.stop();
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Let queued turns finish before the process exits.
async fn shutdown(bus: &MessageBus) {
    if tokio::time::timeout(Duration::from_secs(30), bus.wait_idle())
        .await
        .is_err()
    {
        warn!("turns still running at exit");
    }
    bus.close();
}
