//! Configuration schema types.
//!
//! All structs accept both `snake_case` and `camelCase` field names in
//! JSON via `#[serde(alias)]`. Missing fields fall back to defaults and
//! unknown fields are ignored.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent loop settings.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Model provider endpoint.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Cron service settings.
    #[serde(default)]
    pub cron: CronConfig,

    /// Heartbeat service settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Built-in tool settings.
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Expanded workspace path.
    pub fn workspace_path(&self) -> PathBuf {
        expand_home(&self.agents.defaults.workspace)
    }

    /// Directory holding persisted sessions.
    pub fn sessions_dir(&self) -> PathBuf {
        self.workspace_path().join("sessions")
    }

    /// Expanded cron store path.
    pub fn cron_store_path(&self) -> PathBuf {
        expand_home(&self.cron.store_path)
    }

    /// Heartbeat note file, resolved against the workspace when relative.
    pub fn heartbeat_note_path(&self) -> PathBuf {
        let raw = expand_home(&self.heartbeat.note_file);
        if raw.is_absolute() {
            raw
        } else {
            self.workspace_path().join(raw)
        }
    }
}

// ── Agents ───────────────────────────────────────────────────────────────

/// Agent configuration container.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentsConfig {
    /// Settings for the top-level agent loop.
    #[serde(default)]
    pub defaults: AgentDefaults,

    /// Sub-agent limits for the spawn tool.
    #[serde(default)]
    pub spawn: SpawnConfig,

    /// Model call retry policy.
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Default agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    /// Working directory for agent state.
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Model identifier sent to the provider.
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens in a single model response.
    #[serde(default = "default_max_tokens", alias = "maxTokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum tool-call cycles per turn.
    #[serde(default = "default_max_tool_iterations", alias = "maxToolIterations")]
    pub max_tool_iterations: u32,

    /// System prompt prepended to every model call.
    #[serde(default, alias = "systemPrompt")]
    pub system_prompt: Option<String>,

    /// Bound on a single model call, in seconds.
    #[serde(default = "default_model_timeout_secs", alias = "modelTimeoutSecs")]
    pub model_timeout_secs: u64,

    /// Bound on a single tool invocation, in seconds.
    #[serde(default = "default_tool_timeout_secs", alias = "toolTimeoutSecs")]
    pub tool_timeout_secs: u64,
}

fn default_workspace() -> String {
    "~/.skein/workspace".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tool_iterations() -> u32 {
    20
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    60
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_tool_iterations: default_max_tool_iterations(),
            system_prompt: None,
            model_timeout_secs: default_model_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// Limits for nested agent loops started by the spawn tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnConfig {
    /// Hard maximum nesting depth. The top-level loop is depth 0.
    #[serde(default = "default_spawn_max_depth", alias = "maxDepth")]
    pub max_depth: u32,

    /// Tool-call cycle budget of each child loop.
    #[serde(default = "default_spawn_max_iterations", alias = "maxIterations")]
    pub max_iterations: u32,
}

fn default_spawn_max_depth() -> u32 {
    2
}
fn default_spawn_max_iterations() -> u32 {
    15
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            max_depth: default_spawn_max_depth(),
            max_iterations: default_spawn_max_iterations(),
        }
    }
}

/// Bounded exponential backoff for model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms", alias = "baseDelayMs")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms", alias = "maxDelayMs")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

// ── Provider ─────────────────────────────────────────────────────────────

/// OpenAI-compatible endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_api_base", alias = "apiBase")]
    pub api_base: String,

    /// Explicit API key. Takes precedence over `api_key_env`.
    #[serde(default, alias = "apiKey", skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env", alias = "apiKeyEnv")]
    pub api_key_env: String,

    /// Extra HTTP headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            api_key_env: default_api_key_env(),
            headers: HashMap::new(),
        }
    }
}

// ── Tools ────────────────────────────────────────────────────────────────

/// Built-in tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub exec: ExecConfig,
}

/// Shell `exec` tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Timeout used when a call does not set one.
    #[serde(default = "default_exec_timeout_secs", alias = "timeoutSecs")]
    pub timeout_secs: u64,

    /// Upper bound on a per-call timeout.
    #[serde(default = "default_exec_max_timeout_secs", alias = "maxTimeoutSecs")]
    pub max_timeout_secs: u64,
}

fn default_exec_timeout_secs() -> u64 {
    60
}
fn default_exec_max_timeout_secs() -> u64 {
    300
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_exec_timeout_secs(),
            max_timeout_secs: default_exec_max_timeout_secs(),
        }
    }
}

// ── Services ─────────────────────────────────────────────────────────────

/// Cron service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSONL job log.
    #[serde(default = "default_cron_store", alias = "storePath")]
    pub store_path: String,

    /// Seconds between schedule evaluations.
    #[serde(default = "default_tick_seconds", alias = "tickSeconds")]
    pub tick_seconds: u64,
}

fn default_cron_store() -> String {
    "~/.skein/cron.jsonl".into()
}
fn default_tick_seconds() -> u64 {
    60
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: default_cron_store(),
            tick_seconds: default_tick_seconds(),
        }
    }
}

/// Heartbeat service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_interval_minutes", alias = "intervalMinutes")]
    pub interval_minutes: u64,

    /// Note file inspected on every beat.
    #[serde(default = "default_note_file", alias = "noteFile")]
    pub note_file: String,
}

fn default_interval_minutes() -> u64 {
    30
}
fn default_note_file() -> String {
    "HEARTBEAT.md".into()
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_interval_minutes(),
            note_file: default_note_file(),
        }
    }
}
