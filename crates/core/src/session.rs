//! Conversation history keyed by channel id.
//!
//! When a client sends a `channelId` it already used, the next run sees the
//! earlier questions and answers of that channel.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::channel::ChannelId;
use crate::message::{Conversation, Message};

/// Storage for per-channel conversations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Messages of the channel, oldest first. Empty when unknown.
    async fn history(&self, channel: &ChannelId) -> Vec<Message>;

    /// Append messages to the channel's conversation, creating it if needed.
    async fn append(&self, channel: &ChannelId, messages: Vec<Message>);

    async fn contains(&self, channel: &ChannelId) -> bool;
}

/// Process-local store. The least recently updated conversation is evicted
/// once `max_sessions` is reached.
pub struct InMemorySessionStore {
    conversations: RwLock<HashMap<ChannelId, Conversation>>,
    max_sessions: usize,
}

impl InMemorySessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn history(&self, channel: &ChannelId) -> Vec<Message> {
        self.conversations
            .read()
            .await
            .get(channel)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    async fn append(&self, channel: &ChannelId, messages: Vec<Message>) {
        let mut conversations = self.conversations.write().await;
        if !conversations.contains_key(channel) && conversations.len() >= self.max_sessions {
            let oldest = conversations
                .iter()
                .min_by_key(|(_, c)| c.updated_at)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                tracing::debug!(channel = %oldest, "Evicting oldest conversation");
                conversations.remove(&oldest);
            }
        }
        let conversation = conversations.entry(channel.clone()).or_default();
        for message in messages {
            conversation.push(message);
        }
    }

    async fn contains(&self, channel: &ChannelId) -> bool {
        self.conversations.read().await.contains_key(channel)
    }
}
