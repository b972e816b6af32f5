//! Channel identifiers.
//!
//! A channel correlates one streamed run's events with the client that
//! is waiting for them, and doubles as the conversation key for
//! multi-turn continuation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one in-flight streamed run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Mint a fresh random channel id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a client-supplied id. Surrounding whitespace is dropped.
    pub fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
