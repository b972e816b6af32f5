//! Shared test helpers: a scripted provider and a tiny tool registry.

use async_trait::async_trait;
use matagent_core::error::{ProviderError, ToolError};
use matagent_core::message::Message;
use matagent_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use matagent_core::schema::{FieldKind, InputSchema};
use matagent_core::tool::{Tool, ToolEntry, ToolRegistry, ToolSpec};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A mock provider that replays scripted replies in order.
///
/// The last reply repeats once the script runs out.
pub struct ScriptedProvider {
    script: Vec<Result<String, ProviderError>>,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            script: replies.into_iter().map(Ok).collect(),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn repeating(reply: &str) -> Self {
        Self::new(vec![reply.to_string()])
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            script: vec![Err(error)],
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().get(index).cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .script
            .get(index)
            .or(self.script.last())
            .cloned()
            .unwrap_or_else(|| Ok(final_answer("")))?;
        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
        })
    }
}

/// Model output selecting a tool.
pub fn action(tool: &str, input: serde_json::Value) -> String {
    format!(
        "Thought: use {tool}\nAction:\n```\n{}\n```",
        serde_json::json!({"action": tool, "action_input": input})
    )
}

/// Model output ending the run.
pub fn final_answer(text: &str) -> String {
    format!(
        "Thought: I know what to respond\nAction:\n```\n{}\n```",
        serde_json::json!({"action": "Final Answer", "action_input": text})
    )
}

pub struct EchoTool {
    spec: ToolSpec,
}

impl EchoTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "echo",
                "Repeat the given text",
                InputSchema::new().required("text", FieldKind::String, "Text to repeat"),
            ),
        }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        Ok(arguments["text"].as_str().unwrap_or_default().to_string())
    }
}

pub fn echo_registry() -> ToolRegistry {
    ToolRegistry::new().with(ToolEntry::leaf(EchoTool::new())).unwrap()
}

/// A tool that blocks until released, for cancelling mid-call.
pub struct GatedTool {
    spec: ToolSpec,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new("gated", "Waits until released", InputSchema::new()),
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Tool for GatedTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok("released".into())
    }
}
