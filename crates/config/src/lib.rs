//! Configuration loading, validation, and management for matagent.
//!
//! Loads configuration from `~/.matagent/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use matagent_core::{AgentConfig, CompositeDef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.matagent/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the language model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used by every reasoning run
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Max tokens per LLM response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Reasoning loop settings
    #[serde(default)]
    pub agent: AgentSection,

    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Event bus sizing
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// Conversation store and run lifecycle
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Materials Project API access
    #[serde(default)]
    pub materials: MaterialsConfig,

    /// Composite expert tools, each a nested agent over its own tools
    #[serde(default = "default_experts")]
    pub experts: Vec<CompositeDef>,

    /// Tools available to the top-level run
    #[serde(default = "default_root_tools")]
    pub root_tools: Vec<String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_true() -> bool {
    true
}

fn default_experts() -> Vec<CompositeDef> {
    vec![CompositeDef {
        name: "materials_expert".into(),
        description: "Materials science expert that looks up material properties \
                      such as band gap, formation energy, density, and stability \
                      from the Materials Project database"
            .into(),
        tools: vec!["materials_summary".into(), "calculator".into()],
        persona: Some(
            "You are a materials science expert. Use the Materials Project \
             database to answer questions about material properties."
                .into(),
        ),
        max_steps: None,
    }]
}

fn default_root_tools() -> Vec<String> {
    vec!["materials_expert".into(), "calculator".into()]
}

/// Redact a secret string for Debug output.
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
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("agent", &self.agent)
            .field("gateway", &self.gateway)
            .field("event_bus", &self.event_bus)
            .field("sessions", &self.sessions)
            .field("materials", &self.materials)
            .field("experts", &self.experts)
            .field("root_tools", &self.root_tools)
            .finish()
    }
}

impl std::fmt::Debug for MaterialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialsConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Non-terminal planning rounds allowed per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_max_parse_errors")]
    pub max_consecutive_parse_errors: u32,

    /// Stream model tokens to clients as they are generated
    #[serde(default = "default_true")]
    pub stream_tokens: bool,

    #[serde(default = "default_max_observation_chars")]
    pub max_observation_chars: usize,

    /// Persona of the top-level agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

fn default_max_steps() -> u32 {
    5
}
fn default_max_parse_errors() -> u32 {
    3
}
fn default_max_observation_chars() -> usize {
    8_000
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_consecutive_parse_errors: default_max_parse_errors(),
            stream_tokens: true,
            max_observation_chars: default_max_observation_chars(),
            persona: None,
        }
    }
}

/// How streamed events are written to the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// One JSON event envelope per line
    #[default]
    Json,
    /// `AGENT_ACTION:` / `TOOL_END:` prefixed text records
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Check provider credentials before starting a run
    #[serde(default = "default_true")]
    pub verify_credentials: bool,

    #[serde(default)]
    pub wire_format: WireFormat,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            verify_credentials: true,
            wire_format: WireFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Buffered events per subscriber before the oldest are dropped
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,

    /// Events retained per channel for late subscribers
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
}

fn default_bus_capacity() -> usize {
    256
}
fn default_replay_capacity() -> usize {
    64
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
            replay_capacity: default_replay_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Conversations kept in memory
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// How long a cancelled run may take to stop before it is aborted
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_max_sessions() -> usize {
    1_000
}
fn default_cancel_grace_ms() -> u64 {
    5_000
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MaterialsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_materials_url")]
    pub base_url: String,
}

fn default_materials_url() -> String {
    "https://api.materialsproject.org".into()
}

impl Default for MaterialsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_materials_url(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.matagent/config.toml).
    ///
    /// Environment variables override the file:
    /// - `MATAGENT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `MATAGENT_MODEL`, `MATAGENT_BASE_URL`
    /// - `MP_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
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
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("MATAGENT_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("MATAGENT_MODEL") {
            self.model = model;
        }
        if let Some(url) = lookup("MATAGENT_BASE_URL") {
            self.base_url = url;
        }
        if let Some(key) = lookup("MP_API_KEY") {
            self.materials.api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".matagent")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.event_bus.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "event_bus.capacity must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for expert in &self.experts {
            if expert.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "expert name must not be empty".into(),
                ));
            }
            if !seen.insert(expert.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "expert '{}' is defined more than once",
                    expert.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The reasoning loop configuration derived from this file.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_steps: self.agent.max_steps,
            max_consecutive_parse_errors: self.agent.max_consecutive_parse_errors,
            stream_tokens: self.agent.stream_tokens,
            max_observation_chars: self.agent.max_observation_chars,
            persona: self.agent.persona.clone(),
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: 0.0,
            max_tokens: None,
            agent: AgentSection::default(),
            gateway: GatewayConfig::default(),
            event_bus: EventBusConfig::default(),
            sessions: SessionsConfig::default(),
            materials: MaterialsConfig::default(),
            experts: default_experts(),
            root_tools: default_root_tools(),
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
