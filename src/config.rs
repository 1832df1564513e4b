use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{VisorError, VisorResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions URL.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var VISOR_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Decides the next action batch each step.
    pub agent: Option<RoleEntry>,
    /// Picks the region of interest before parsing.
    pub crop: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Base URL of the UI parsing service; requests go to `<endpoint>/omni`.
    #[serde(default = "default_parser_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_parser_timeout")]
    pub timeout_secs: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            endpoint: default_parser_endpoint(),
            timeout_secs: default_parser_timeout(),
        }
    }
}

fn default_parser_endpoint() -> String {
    "http://127.0.0.1:7777".into()
}

fn default_parser_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    /// Number of raw conversation entries replayed to the model each step.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_parse_backoff")]
    pub parse_backoff_ms: u64,
    #[serde(default = "default_llm_backoff")]
    pub llm_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub crop_enabled: bool,
    /// Attach the raw capture and labeled overlay to each prompt.
    #[serde(default = "default_true")]
    pub send_screenshot: bool,
    #[serde(default = "default_true")]
    pub include_diagnostics: bool,
    /// Purge old screenshots after this many captures.
    #[serde(default = "default_housekeeping_every")]
    pub housekeeping_every: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_errors: default_max_errors(),
            history_window: default_history_window(),
            parse_backoff_ms: default_parse_backoff(),
            llm_backoff_ms: default_llm_backoff(),
            crop_enabled: true,
            send_screenshot: true,
            include_diagnostics: true,
            housekeeping_every: default_housekeeping_every(),
        }
    }
}

fn default_max_steps() -> u32 {
    200
}

fn default_max_errors() -> u32 {
    3
}

fn default_history_window() -> usize {
    6
}

fn default_parse_backoff() -> u64 {
    5000
}

fn default_llm_backoff() -> u64 {
    2000
}

fn default_housekeeping_every() -> u32 {
    5
}

/// Settle delays applied after each primitive action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_click_settle")]
    pub click_settle_ms: u64,
    #[serde(default = "default_double_click_gap")]
    pub double_click_gap_ms: u64,
    #[serde(default = "default_scroll_settle")]
    pub scroll_settle_ms: u64,
    #[serde(default = "default_type_settle")]
    pub type_settle_ms: u64,
    #[serde(default = "default_key_settle")]
    pub key_settle_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            click_settle_ms: default_click_settle(),
            double_click_gap_ms: default_double_click_gap(),
            scroll_settle_ms: default_scroll_settle(),
            type_settle_ms: default_type_settle(),
            key_settle_ms: default_key_settle(),
        }
    }
}

fn default_click_settle() -> u64 {
    300
}

fn default_double_click_gap() -> u64 {
    100
}

fn default_scroll_settle() -> u64 {
    700
}

fn default_type_settle() -> u64 {
    400
}

fn default_key_settle() -> u64 {
    400
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptsConfig {
    /// Text file holding the agent's system instructions.
    #[serde(default)]
    pub system_prompt_file: Option<String>,
}

fn default_true() -> bool {
    true
}

fn resolve_config_path() -> VisorResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(VisorError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> VisorResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> VisorResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> VisorResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

/// Returns `<data_local_dir>/Visor`, falling back to the current working directory.
pub fn data_dir() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let d = base.join("Visor");
        if std::fs::create_dir_all(&d).is_ok() {
            return d;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
