//! Agent configuration.
//!
//! One `AgentConfig` is built per process (or per request) and passed down
//! to every reasoning run, including nested composite runs. Nothing reads
//! ambient globals.

use serde::{Deserialize, Serialize};

/// Configuration for the reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model to request from the provider
    pub model: String,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Hard cap on non-terminal planning rounds per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Consecutive unparseable model outputs tolerated before failing
    #[serde(default = "default_max_parse_errors")]
    pub max_consecutive_parse_errors: u32,

    /// Publish model output deltas as `TokenChunk` events
    #[serde(default = "default_true")]
    pub stream_tokens: bool,

    /// Observations longer than this are truncated before re-prompting
    #[serde(default = "default_max_observation_chars")]
    pub max_observation_chars: usize,

    /// Persona prepended to the top-level system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

fn default_max_steps() -> u32 {
    5
}
fn default_max_parse_errors() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_max_observation_chars() -> usize {
    8_000
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            max_steps: default_max_steps(),
            max_consecutive_parse_errors: default_max_parse_errors(),
            stream_tokens: true,
            max_observation_chars: default_max_observation_chars(),
            persona: None,
        }
    }

    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_max_parse_errors(mut self, max: u32) -> Self {
        self.max_consecutive_parse_errors = max;
        self
    }

    pub fn with_token_streaming(mut self, enabled: bool) -> Self {
        self.stream_tokens = enabled;
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }
}
