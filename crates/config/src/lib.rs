//! Configuration loading, validation, and management for semloop.
//!
//! Loads configuration from `~/.semloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use semloop_parsers::NoMarkerPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.semloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Reasoning loop budgets and policies
    #[serde(default)]
    pub agent: AgentConfig,

    /// Event broadcaster sizing
    #[serde(default)]
    pub events: EventsConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("events", &self.events)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Limits and policies applied to every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum THINKING entries per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Maximum consecutive retriable failures per run
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Wall-clock budget for a whole run
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// How output without any marker is treated
    #[serde(default)]
    pub no_marker_policy: NoMarkerPolicy,

    /// Ask the model to review its own final answer before accepting it
    #[serde(default)]
    pub self_evaluation: bool,
}

fn default_max_iterations() -> usize {
    10
}
fn default_max_retries() -> usize {
    3
}
fn default_model_timeout() -> u64 {
    120
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_run_timeout() -> u64 {
    600
}

impl AgentConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            model_timeout_secs: default_model_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            run_timeout_secs: default_run_timeout(),
            no_marker_policy: NoMarkerPolicy::default(),
            self_evaluation: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-subscriber queue length before the oldest events are dropped
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,

    /// Recent events replayed to a new subscriber
    #[serde(default = "default_event_history")]
    pub history: usize,
}

fn default_event_capacity() -> usize {
    256
}
fn default_event_history() -> usize {
    64
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
            history: default_event_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42718
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.semloop/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `SEMLOOP_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("SEMLOOP_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("SEMLOOP_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("SEMLOOP_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".semloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_retries must be at least 1".into(),
            ));
        }
        for (name, secs) in [
            ("agent.model_timeout_secs", self.agent.model_timeout_secs),
            ("agent.tool_timeout_secs", self.agent.tool_timeout_secs),
            ("agent.run_timeout_secs", self.agent.run_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "events.capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            events: EventsConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
