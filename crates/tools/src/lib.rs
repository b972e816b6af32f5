//! Built-in tool implementations for matagent.
//!
//! Leaf tools give the agent direct capabilities (arithmetic, Materials
//! Project lookups). [`default_catalog`] combines them with the composite
//! experts declared in configuration, and [`default_registry`] resolves the
//! configured root tools into the registry the top-level run uses.

pub mod calculator;
pub mod echo;
pub mod materials_summary;

use matagent_config::AppConfig;
use matagent_core::error::{RegistryError, ToolError};
use matagent_core::tool::{ToolCatalog, ToolRegistry};
use std::sync::Arc;
use tracing::debug;

pub use calculator::CalculatorTool;
pub use echo::EchoTool;
pub use materials_summary::MaterialsSummaryTool;

/// All built-in leaf tools plus the configured experts.
pub fn default_catalog(config: &AppConfig) -> Result<ToolCatalog, RegistryError> {
    Toolset::new(config).catalog(None)
}

/// The registry of the top-level run: `config.root_tools` resolved
/// against [`default_catalog`].
pub fn default_registry(config: &AppConfig) -> Result<ToolRegistry, RegistryError> {
    Toolset::new(config).registry(None)
}

/// Builds tool registries from configuration.
///
/// A request may bring its own Materials Project key; the registry built
/// for it carries that key into every expert that uses `materials_summary`.
#[derive(Clone)]
pub struct Toolset {
    config: AppConfig,
    client: reqwest::Client,
}

impl Toolset {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            config: config.clone(),
            client: materials_summary::http_client(),
        }
    }

    /// The request key when given, the configured key otherwise.
    fn materials_key(&self, requested: Option<&str>) -> Option<String> {
        requested
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .or_else(|| self.config.materials.api_key.clone())
    }

    pub fn materials_tool(&self, materials_key: Option<&str>) -> MaterialsSummaryTool {
        MaterialsSummaryTool::with_client(
            &self.config.materials.base_url,
            self.materials_key(materials_key),
            self.client.clone(),
        )
    }

    pub fn catalog(&self, materials_key: Option<&str>) -> Result<ToolCatalog, RegistryError> {
        let mut catalog = ToolCatalog::new();
        catalog.add_leaf(Arc::new(EchoTool::new()))?;
        catalog.add_leaf(Arc::new(CalculatorTool::new()))?;
        catalog.add_leaf(Arc::new(self.materials_tool(materials_key)))?;
        for expert in &self.config.experts {
            catalog.add_composite(expert.clone())?;
        }
        Ok(catalog)
    }

    pub fn registry(&self, materials_key: Option<&str>) -> Result<ToolRegistry, RegistryError> {
        self.catalog(materials_key)?.build_registry(&self.config.root_tools)
    }

    /// Verify the effective Materials Project key. Without any key there is
    /// nothing to check; the tool reports the missing key when it is used.
    pub async fn verify_materials_key(&self, materials_key: Option<&str>) -> Result<(), ToolError> {
        let tool = self.materials_tool(materials_key);
        if !tool.has_api_key() {
            debug!("No Materials Project key to verify");
            return Ok(());
        }
        tool.verify_key().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matagent_core::CompositeDef;
    use matagent_core::tool::{Tool, ToolEntry};

    #[test]
    fn default_config_resolves() {
        let registry = default_registry(&AppConfig::default()).unwrap();
        assert_eq!(registry.tool_names(), vec!["calculator", "materials_expert"]);
        let Some(ToolEntry::Composite(expert)) = registry.get("materials_expert") else {
            panic!("materials_expert should be a composite");
        };
        assert_eq!(expert.registry.tool_names(), vec!["calculator", "materials_summary"]);
        assert!(expert.persona.is_some());
    }

    #[test]
    fn expert_cycle_is_rejected() {
        let mut config = AppConfig::default();
        config.experts.push(CompositeDef {
            name: "a".into(),
            description: "a".into(),
            tools: vec!["b".into()],
            persona: None,
            max_steps: None,
        });
        config.experts.push(CompositeDef {
            name: "b".into(),
            description: "b".into(),
            tools: vec!["a".into()],
            persona: None,
            max_steps: None,
        });
        config.root_tools = vec!["a".into()];
        let err = default_registry(&config).err().unwrap();
        assert!(matches!(err, RegistryError::Cycle { ref path } if path.contains(&"b".to_string())));
    }

    #[tokio::test]
    async fn request_key_reaches_the_expert_registry() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let body = r#"{"data":[]}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let mut config = AppConfig::default();
        config.materials.base_url = format!("http://{addr}");
        config.materials.api_key = Some("configured-key".into());
        let registry = Toolset::new(&config).registry(Some("request-key")).unwrap();

        let Some(ToolEntry::Composite(expert)) = registry.get("materials_expert") else {
            panic!("materials_expert should be a composite");
        };
        let Some(ToolEntry::Leaf(tool)) = expert.registry.get("materials_summary") else {
            panic!("materials_summary should be a leaf");
        };
        tool.invoke(serde_json::json!({"formula": "Si"})).await.unwrap();

        let request = server.await.unwrap().to_lowercase();
        assert!(request.contains("x-api-key: request-key"));
    }

    #[test]
    fn blank_request_key_falls_back_to_configured() {
        let mut config = AppConfig::default();
        config.materials.api_key = Some("configured-key".into());
        let toolset = Toolset::new(&config);
        assert_eq!(toolset.materials_key(Some("  ")).as_deref(), Some("configured-key"));
        assert_eq!(toolset.materials_key(Some("mine")).as_deref(), Some("mine"));
        assert!(Toolset::new(&AppConfig::default()).materials_key(None).is_none());
    }

    #[tokio::test]
    async fn nothing_to_verify_without_a_key() {
        let mut config = AppConfig::default();
        config.materials.base_url = "http://127.0.0.1:9".into();
        Toolset::new(&config).verify_materials_key(None).await.unwrap();
    }

    #[test]
    fn expert_shadowing_builtin_is_rejected() {
        let mut config = AppConfig::default();
        config.experts.push(CompositeDef {
            name: "calculator".into(),
            description: "shadow".into(),
            tools: vec![],
            persona: None,
            max_steps: None,
        });
        assert!(matches!(
            default_catalog(&config).err().unwrap(),
            RegistryError::Duplicate(_)
        ));
    }
}
