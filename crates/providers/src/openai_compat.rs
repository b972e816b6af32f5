//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, and any endpoint that
//! exposes `/chat/completions` and `/models`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Credential verification before a run starts

use async_trait::async_trait;
use futures::StreamExt;
use matagent_core::error::ProviderError;
use matagent_core::message::{Message, Role};
use matagent_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }
}

/// Map a non-success status to a provider error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::AuthenticationFailed(
            api_error_message(&body)
                .unwrap_or_else(|| "Invalid API key or insufficient permissions".into()),
        ));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: api_error_message(&error_body).unwrap_or(error_body),
        });
    }

    Ok(response)
}

/// Extract `error.message` from an OpenAI-style error body.
fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(String::from)
}

#[async_trait]
impl matagent_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            usage,
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in decoder.push(&bytes) {
                    match event {
                        SseEvent::Done => {
                            let _ = tx.send(Ok(StreamChunk { done: true, ..Default::default() })).await;
                            return;
                        }
                        SseEvent::Data(data) => match serde_json::from_str::<StreamResponse>(&data) {
                            Ok(stream_resp) => {
                                let content = stream_resp
                                    .choices
                                    .first()
                                    .and_then(|c| c.delta.content.clone())
                                    .filter(|c| !c.is_empty());

                                if let Some(content) = content {
                                    let chunk = StreamChunk {
                                        content: Some(content),
                                        ..Default::default()
                                    };
                                    if tx.send(Ok(chunk)).await.is_err() {
                                        return; // receiver dropped
                                    }
                                }

                                // Handle usage in final stream chunk (stream_options)
                                if let Some(usage) = stream_resp.usage {
                                    let chunk = StreamChunk {
                                        content: None,
                                        done: true,
                                        usage: Some(Usage {
                                            prompt_tokens: usage.prompt_tokens,
                                            completion_tokens: usage.completion_tokens,
                                            total_tokens: usage.total_tokens,
                                        }),
                                    };
                                    let _ = tx.send(Ok(chunk)).await;
                                    return;
                                }
                            }
                            Err(e) => {
                                trace!(
                                    provider = %provider_name,
                                    data = %data,
                                    error = %e,
                                    "Ignoring unparseable SSE chunk"
                                );
                            }
                        },
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamChunk { done: true, ..Default::default() })).await;
        });

        Ok(rx)
    }

    async fn verify_credentials(&self) -> std::result::Result<(), ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }
}

/// One decoded server-sent event.
#[derive(Debug, PartialEq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Line-buffers an SSE byte stream; chunks may split lines anywhere.
#[derive(Default)]
struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    events.push(SseEvent::Done);
                } else {
                    events.push(SseEvent::Data(data.to_string()));
                }
            }
        }
        events
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use matagent_core::Provider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection.
    async fn serve_canned(status: &'static str, content_type: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 16 * 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/v1")
    }

    #[test]
    fn openai_constructor() {
        let provider = OpenAiCompatProvider::openai("sk-test");
        assert_eq!(provider.name(), "openai");
        assert!(provider.base_url().contains("api.openai.com"));
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url().contains("localhost:11434"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("x", "http://host/v1/", "k");
        assert_eq!(provider.base_url(), "http://host/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn request_body_carries_stop_sequences() {
        let mut request = ProviderRequest::new("gpt-4o", vec![Message::user("hi")]);
        request.stop = vec!["Observation".into()];
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["stop"][0], "Observation");
        assert_eq!(body["stream"], true);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn error_message_extracted_from_body() {
        let body = r#"{"error":{"message":"Incorrect API key provided: sk-bad","type":"invalid_request_error"}}"#;
        assert_eq!(
            api_error_message(body).as_deref(),
            Some("Incorrect API key provided: sk-bad")
        );
        assert!(api_error_message("not json").is_none());
    }

    // --- SSE parsing tests ---

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let events = decoder.push(b":1}\r\n\r\n: keep-alive\ndata: [DONE]\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".into()), SseEvent::Done]
        );
    }

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_stream_usage() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn complete_against_local_server() {
        let url = serve_canned(
            "200 OK",
            "application/json",
            r#"{"model":"gpt-4o","choices":[{"message":{"role":"assistant","content":"Final Answer: 4"}}],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        )
        .await;
        let provider = OpenAiCompatProvider::new("test", url, "sk-test");
        let response = provider
            .complete(ProviderRequest::new("gpt-4o", vec![Message::user("2+2?")]))
            .await
            .unwrap();
        assert_eq!(response.message.content, "Final Answer: 4");
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn stream_against_local_server() {
        let url = serve_canned(
            "200 OK",
            "text/event-stream",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Final \"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"Answer: 4\"}}]}\n\ndata: [DONE]\n\n",
        )
        .await;
        let provider = OpenAiCompatProvider::new("test", url, "sk-test");
        let mut rx = provider
            .stream(ProviderRequest::new("gpt-4o", vec![Message::user("2+2?")]))
            .await
            .unwrap();

        let mut text = String::new();
        let mut done = false;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            if let Some(content) = chunk.content {
                text.push_str(&content);
            }
            done |= chunk.done;
        }
        assert_eq!(text, "Final Answer: 4");
        assert!(done);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_failed() {
        let url = serve_canned(
            "401 Unauthorized",
            "application/json",
            r#"{"error":{"message":"Incorrect API key provided"}}"#,
        )
        .await;
        let provider = OpenAiCompatProvider::new("test", url, "sk-bad");
        let err = provider.verify_credentials().await.unwrap_err();
        assert!(
            matches!(err, ProviderError::AuthenticationFailed(ref m) if m == "Incorrect API key provided")
        );
    }

    #[tokio::test]
    async fn rate_limit_maps_to_rate_limited() {
        let url = serve_canned("429 Too Many Requests", "application/json", "{}").await;
        let provider = OpenAiCompatProvider::new("test", url, "sk-test");
        let err = provider
            .complete(ProviderRequest::new("gpt-4o", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }
}
