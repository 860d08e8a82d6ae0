//! `skein sessions` -- inspect conversation sessions.
//!
//! Sessions are JSONL files under `<workspace>/sessions/`.
//!
//! # Examples
//!
//! ```text
//! skein sessions list
//! skein sessions inspect cli:local
//! ```

use std::fmt::Write;
use std::sync::Arc;

use comfy_table::{Table, presets::UTF8_FULL};

use skein_core::{JsonlSessionStore, SessionManager};
use skein_types::config::Config;
use skein_types::session::{Role, Session};

fn session_manager(config: &Config) -> SessionManager {
    SessionManager::new(Arc::new(JsonlSessionStore::new(config.sessions_dir())))
}

fn format_datetime(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// First `max_chars` characters of `content` on one line, with "..." if cut.
fn preview(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// List all sessions.
pub async fn sessions_list(config: &Config) -> anyhow::Result<()> {
    let mgr = session_manager(config);
    let keys = mgr.list().await?;

    if keys.is_empty() {
        println!("No sessions found.");
        println!("  Dir: {}", config.sessions_dir().display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["SESSION KEY", "TURNS", "REVISION", "LAST ACTIVITY"]);

    for key in &keys {
        match mgr.get(key).await {
            Ok(Some(session)) => {
                table.add_row([
                    key.clone(),
                    session.len().to_string(),
                    session.revision.to_string(),
                    format_datetime(&session.last_activity),
                ]);
            }
            Ok(None) => {}
            Err(e) => {
                table.add_row([key.clone(), "-".into(), "-".into(), format!("error: {e}")]);
            }
        }
    }

    println!("{table}");
    Ok(())
}

/// Print every turn of one session.
pub async fn sessions_inspect(key: &str, config: &Config) -> anyhow::Result<()> {
    let mgr = session_manager(config);
    let Some(session) = mgr.get(key).await? else {
        anyhow::bail!("session not found: {key}");
    };
    print!("{}", render_session(&session));
    Ok(())
}

fn render_session(session: &Session) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session: {}", session.key);
    let _ = writeln!(
        out,
        "Turns: {}  Revision: {}  Created: {}  Last activity: {}",
        session.len(),
        session.revision,
        format_datetime(&session.created_at),
        format_datetime(&session.last_activity),
    );
    out.push('\n');

    for (i, turn) in session.turns.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{i}] {} {}: {}",
            turn.timestamp.format("%H:%M:%S"),
            role_label(turn.role),
            preview(&turn.content, 120)
        );
        for call in &turn.tool_calls {
            let _ = writeln!(out, "      -> {} ({})", call.name, call.id);
        }
        if let Some(result) = &turn.tool_result
            && let Some(kind) = result.failure_kind()
        {
            let _ = writeln!(out, "      !! {kind:?}");
        }
    }
    out
}
