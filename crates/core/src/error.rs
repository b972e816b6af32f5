//! Error types for the matagent domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Recoverable errors (`ParseError`, `ToolError`) never leave a reasoning
//! run; they are turned into observations. `RunError` is what ends a run.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Model output did not match the action grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Could not parse model output: {message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Upstream service error in {tool_name}: {reason}")]
    Upstream { tool_name: String, reason: String },

    /// The upstream service rejected the tool's credentials
    #[error("Invalid credentials for {tool_name}: {reason}")]
    Unauthorized { tool_name: String, reason: String },
}

/// Errors raised while assembling a tool registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),

    #[error("Tool cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Unknown tool '{0}'")]
    Unknown(String),
}

/// Fatal outcomes of a reasoning run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("step budget exceeded")]
    StepBudgetExceeded { max_steps: u32 },

    #[error("too many consecutive parse errors ({count})")]
    ParseErrorLimit { count: u32 },

    #[error("upstream authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("language model call failed: {0}")]
    Provider(String),

    #[error("run cancelled")]
    Cancelled,
}

impl From<ProviderError> for RunError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::AuthenticationFailed(reason) => RunError::UpstreamAuth(reason),
            other => RunError::Provider(other.to_string()),
        }
    }
}
