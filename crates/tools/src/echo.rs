//! Echo tool: returns its input unchanged. Handy for smoke-testing the
//! tool round trip without any external service.

use async_trait::async_trait;
use matagent_core::error::ToolError;
use matagent_core::schema::{FieldKind, InputSchema};
use matagent_core::tool::{Tool, ToolSpec};

pub struct EchoTool {
    spec: ToolSpec,
}

impl EchoTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "echo",
                "Repeat the given text back verbatim",
                InputSchema::new().required("text", FieldKind::String, "Text to repeat"),
            ),
        }
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
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
