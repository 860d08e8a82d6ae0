//! CLI command implementations for `skein`.
//!
//! Each subcommand is implemented in its own module:
//!
//! - [`agent`] -- Interactive console or single-message mode.
//! - [`gateway`] -- Agent loop plus cron and heartbeat services.
//! - [`cron`] -- Scheduled job management.
//! - [`sessions`] -- Session listing and inspection.

pub mod agent;
pub mod channel;
pub mod cron;
pub mod gateway;
pub mod sessions;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use skein_core::bootstrap::AppContext;
use skein_llm::{Model, OpenAiCompatModel};
use skein_types::config::Config;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "SKEIN_CONFIG";

/// Pick the config file to read.
///
/// Order: the `--config` override, then `SKEIN_CONFIG`, then
/// `~/.skein/config.json` if it exists.
pub fn discover_config_path(
    config_override: Option<&str>,
    env_value: Option<String>,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = config_override {
        return Some(PathBuf::from(path));
    }
    if let Some(path) = env_value.filter(|v| !v.trim().is_empty()) {
        return Some(PathBuf::from(path));
    }
    home.map(|h| h.join(".skein").join("config.json"))
        .filter(|p| p.exists())
}

/// Load configuration from the given path override or via discovery.
///
/// Returns a default `Config` if no config file is found. An explicit
/// path that does not exist is an error.
pub fn load_config(config_override: Option<&str>) -> anyhow::Result<Config> {
    let home = dirs::home_dir();
    let path = discover_config_path(
        config_override,
        std::env::var(CONFIG_ENV).ok(),
        home.as_deref(),
    );

    let Some(path) = path else {
        debug!("no config file found, using defaults");
        return Ok(Config::default());
    };

    if !path.exists() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Wire the core with the configured provider and the built-in tools.
///
/// Sessions are stored as JSONL under the workspace.
pub fn build_context(config: &Config) -> anyhow::Result<AppContext> {
    let model: Arc<dyn Model> = Arc::new(OpenAiCompatModel::new(config.provider.clone()));
    let mut ctx = AppContext::with_workspace_sessions(config.clone(), Arc::clone(&model));
    skein_tools::register_all(ctx.tools_mut(), model, config)?;
    info!(
        model = %config.agents.defaults.model,
        tools = ctx.tools().len(),
        "tool registry initialized"
    );
    Ok(ctx)
}
