//! Provider trait: the abstraction over LLM backends.
//!
//! The reasoning loop treats the model as an opaque text-completion
//! service. A provider turns a list of messages into a reply, either in
//! one piece or as a stream of deltas.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.0,
            max_tokens: None,
            stream: false,
            stop: Vec::new(),
        }
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// The agent loop calls `complete()` or `stream()` without knowing which
/// backend is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.message.content),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Check that the configured credentials are accepted, before any
    /// work is started on the user's behalf.
    async fn verify_credentials(&self) -> std::result::Result<(), ProviderError> {
        Ok(())
    }
}

/// Builds providers, optionally with a caller-supplied API key.
///
/// The gateway uses this to give each request that brings its own key a
/// provider of its own.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, api_key: Option<&str>) -> std::result::Result<Arc<dyn Provider>, ProviderError>;
}

/// Hands out the same provider regardless of the key.
impl ProviderFactory for Arc<dyn Provider> {
    fn build(&self, _api_key: Option<&str>) -> std::result::Result<Arc<dyn Provider>, ProviderError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl Provider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant("Final Answer: ok"),
                usage: None,
                model: request.model,
            })
        }
    }

    #[test]
    fn request_defaults() {
        let req = ProviderRequest::new("gpt-4o", vec![Message::user("hi")]);
        assert_eq!(req.temperature, 0.0);
        assert!(!req.stream);
        assert!(req.stop.is_empty());
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("stop"));
    }

    #[tokio::test]
    async fn default_stream_yields_single_chunk() {
        let mut rx = Fixed
            .stream(ProviderRequest::new("m", vec![]))
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("Final Answer: ok"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn shared_provider_factory_ignores_key() {
        let shared: Arc<dyn Provider> = Arc::new(Fixed);
        let built = shared.build(Some("sk-user")).unwrap();
        assert_eq!(built.name(), "fixed");
        assert!(built.verify_credentials().await.is_ok());
    }
}
