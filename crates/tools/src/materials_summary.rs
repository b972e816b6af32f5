//! Materials Project summary lookup.
//!
//! Queries `GET {base_url}/materials/summary/` with the `X-API-KEY` header
//! and renders the matching entries as compact text lines the model can
//! read back as an observation.

use async_trait::async_trait;
use matagent_core::error::ToolError;
use matagent_core::schema::{FieldKind, InputSchema};
use matagent_core::tool::{Tool, ToolSpec};
use serde::Deserialize;
use tracing::debug;

const SUMMARY_FIELDS: &str = "material_id,formula_pretty,band_gap,formation_energy_per_atom,\
energy_above_hull,is_stable,density,volume,symmetry";

/// String filters forwarded verbatim as query parameters.
const STRING_FILTERS: [&str; 4] = ["material_ids", "formula", "chemsys", "elements"];

pub struct MaterialsSummaryTool {
    spec: ToolSpec,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl MaterialsSummaryTool {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(base_url, api_key, http_client())
    }

    /// Share an existing HTTP client, e.g. across request-scoped instances.
    pub fn with_client(base_url: impl Into<String>, api_key: Option<String>, client: reqwest::Client) -> Self {
        Self {
            spec: ToolSpec::new(
                "materials_summary",
                "Search the Materials Project database for summary properties \
                 (band gap, formation energy, energy above hull, stability, density, \
                 space group) of materials by id, formula, chemical system, or elements",
                InputSchema::new()
                    .optional("material_ids", FieldKind::String, "Comma-separated material ids, e.g. 'mp-149,mp-13'")
                    .optional("formula", FieldKind::String, "Formula, anonymized formula, or wildcard, e.g. 'Fe2O3'")
                    .optional("chemsys", FieldKind::String, "Chemical system, e.g. 'Li-Fe-O'")
                    .optional("elements", FieldKind::String, "Comma-separated elements that must be present")
                    .optional("is_stable", FieldKind::Boolean, "Only thermodynamically stable materials")
                    .optional("band_gap_min", FieldKind::Number, "Minimum band gap in eV")
                    .optional("band_gap_max", FieldKind::Number, "Maximum band gap in eV")
                    .optional("limit", FieldKind::Integer, "Maximum number of entries (default 5)"),
            ),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check the API key with a one-entry lookup.
    ///
    /// 401 and 403 are reported as [`ToolError::Unauthorized`]; any other
    /// failure as [`ToolError::Upstream`].
    pub async fn verify_key(&self) -> Result<(), ToolError> {
        let name = &self.spec.name;
        let api_key = self.api_key.as_deref().ok_or_else(|| ToolError::Unauthorized {
            tool_name: name.clone(),
            reason: "no Materials Project API key".into(),
        })?;

        let response = self
            .client
            .get(format!("{}/materials/summary/", self.base_url))
            .header("X-API-KEY", api_key)
            .query(&[("material_ids", "mp-149"), ("_limit", "1"), ("_fields", "material_id")])
            .send()
            .await
            .map_err(|e| ToolError::Upstream {
                tool_name: name.clone(),
                reason: e.to_string(),
            })?;

        check_status(name, response).await.map(|_| ())
    }

    fn query(&self, arguments: &serde_json::Value) -> Result<Vec<(String, String)>, ToolError> {
        let mut params = Vec::new();
        for key in STRING_FILTERS {
            if let Some(value) = arguments[key].as_str().map(str::trim).filter(|v| !v.is_empty()) {
                params.push((key.to_string(), value.to_string()));
            }
        }
        if params.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool_name: self.spec.name.clone(),
                reason: "one of material_ids, formula, chemsys, or elements is required".into(),
            });
        }

        if let Some(stable) = arguments["is_stable"].as_bool() {
            params.push(("is_stable".into(), stable.to_string()));
        }
        for key in ["band_gap_min", "band_gap_max"] {
            if let Some(v) = arguments[key].as_f64() {
                params.push((key.into(), v.to_string()));
            }
        }
        let limit = arguments["limit"].as_u64().unwrap_or(5).clamp(1, 50);
        params.push(("_limit".into(), limit.to_string()));
        params.push(("_fields".into(), SUMMARY_FIELDS.into()));
        Ok(params)
    }
}

#[async_trait]
impl Tool for MaterialsSummaryTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let name = &self.spec.name;
        let api_key = self.api_key.as_deref().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: name.clone(),
            reason: "Materials Project API key is not configured (set MP_API_KEY)".into(),
        })?;
        let params = self.query(&arguments)?;

        let url = format!("{}/materials/summary/", self.base_url);
        debug!(tool = %name, ?params, "Querying Materials Project");

        let upstream = |reason: String| ToolError::Upstream {
            tool_name: name.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", api_key)
            .query(&params)
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;

        let body: SummaryResponse = check_status(name, response)
            .await?
            .json()
            .await
            .map_err(|e| upstream(format!("unexpected response: {e}")))?;

        if body.data.is_empty() {
            return Ok("No materials matched the query.".into());
        }
        Ok(body
            .data
            .iter()
            .map(SummaryDoc::render)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

async fn check_status(tool_name: &str, response: reqwest::Response) -> Result<reqwest::Response, ToolError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let reason = format!("HTTP {}: {}", status.as_u16(), body.trim());
    if matches!(status.as_u16(), 401 | 403) {
        Err(ToolError::Unauthorized {
            tool_name: tool_name.to_string(),
            reason,
        })
    } else {
        Err(ToolError::Upstream {
            tool_name: tool_name.to_string(),
            reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    data: Vec<SummaryDoc>,
}

#[derive(Debug, Deserialize)]
struct SummaryDoc {
    material_id: Option<String>,
    formula_pretty: Option<String>,
    band_gap: Option<f64>,
    formation_energy_per_atom: Option<f64>,
    energy_above_hull: Option<f64>,
    is_stable: Option<bool>,
    density: Option<f64>,
    volume: Option<f64>,
    #[serde(default)]
    symmetry: Option<Symmetry>,
}

#[derive(Debug, Deserialize)]
struct Symmetry {
    symbol: Option<String>,
    crystal_system: Option<String>,
}

impl SummaryDoc {
    fn render(&self) -> String {
        let mut parts = vec![format!(
            "{} ({})",
            self.material_id.as_deref().unwrap_or("unknown id"),
            self.formula_pretty.as_deref().unwrap_or("?")
        )];
        let mut num = |label: &str, value: Option<f64>, unit: &str| {
            if let Some(v) = value {
                parts.push(format!("{label}={v:.4} {unit}").trim_end().to_string());
            }
        };
        num("band_gap", self.band_gap, "eV");
        num("formation_energy", self.formation_energy_per_atom, "eV/atom");
        num("e_above_hull", self.energy_above_hull, "eV/atom");
        num("density", self.density, "g/cm^3");
        num("volume", self.volume, "A^3");
        if let Some(stable) = self.is_stable {
            parts.push(format!("stable={stable}"));
        }
        if let Some(sym) = &self.symmetry
            && let Some(symbol) = &sym.symbol
        {
            match &sym.crystal_system {
                Some(system) => parts.push(format!("spacegroup={symbol} ({system})")),
                None => parts.push(format!("spacegroup={symbol}")),
            }
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response and hand back the raw request text.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            request
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn renders_summary_entries() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"data":[{"material_id":"mp-149","formula_pretty":"Si","band_gap":0.6105,"energy_above_hull":0.0,"is_stable":true,"symmetry":{"symbol":"Fd-3m","crystal_system":"Cubic"}}]}"#,
        )
        .await;
        let tool = MaterialsSummaryTool::new(url, Some("mp-key".into()));
        let out = tool
            .invoke(serde_json::json!({"formula": "Si", "limit": 1}))
            .await
            .unwrap();

        assert!(out.starts_with("mp-149 (Si)"));
        assert!(out.contains("band_gap=0.6105 eV"));
        assert!(out.contains("stable=true"));
        assert!(out.contains("spacegroup=Fd-3m (Cubic)"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /materials/summary/?formula=Si"));
        assert!(request.contains("_limit=1"));
        assert!(request.to_lowercase().contains("x-api-key: mp-key"));
    }

    #[tokio::test]
    async fn empty_result_is_reported() {
        let (url, _server) = serve_once("200 OK", r#"{"data":[]}"#).await;
        let tool = MaterialsSummaryTool::new(url, Some("k".into()));
        let out = tool.invoke(serde_json::json!({"chemsys": "Xx-Yy"})).await.unwrap();
        assert_eq!(out, "No materials matched the query.");
    }

    #[tokio::test]
    async fn upstream_errors_surface() {
        let (url, _server) = serve_once("500 Internal Server Error", r#"{"detail":"down"}"#).await;
        let tool = MaterialsSummaryTool::new(url, Some("k".into()));
        let err = tool.invoke(serde_json::json!({"formula": "Si"})).await.unwrap_err();
        assert!(matches!(err, ToolError::Upstream { ref reason, .. } if reason.contains("500")));
    }

    #[tokio::test]
    async fn rejected_key_is_unauthorized() {
        let (url, _server) = serve_once("403 Forbidden", r#"{"detail":"invalid key"}"#).await;
        let tool = MaterialsSummaryTool::new(url, Some("bad".into()));
        let err = tool.invoke(serde_json::json!({"formula": "Si"})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unauthorized { ref reason, .. } if reason.contains("403")));
    }

    #[tokio::test]
    async fn verify_key_sends_a_one_entry_lookup() {
        let (url, server) = serve_once("200 OK", r#"{"data":[{"material_id":"mp-149"}]}"#).await;
        let tool = MaterialsSummaryTool::new(url, Some("good".into()));
        tool.verify_key().await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /materials/summary/?material_ids=mp-149"));
        assert!(request.to_lowercase().contains("x-api-key: good"));
    }

    #[tokio::test]
    async fn verify_key_reports_rejection() {
        let (url, _server) = serve_once("401 Unauthorized", r#"{"detail":"bad"}"#).await;
        let tool = MaterialsSummaryTool::new(url, Some("bad".into()));
        assert!(matches!(tool.verify_key().await, Err(ToolError::Unauthorized { .. })));

        let keyless = MaterialsSummaryTool::new("http://127.0.0.1:9", None);
        assert!(!keyless.has_api_key());
        assert!(matches!(keyless.verify_key().await, Err(ToolError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let tool = MaterialsSummaryTool::new("http://127.0.0.1:9", None);
        let err = tool.invoke(serde_json::json!({"formula": "Si"})).await.unwrap_err();
        assert!(err.to_string().contains("MP_API_KEY"));
    }

    #[test]
    fn query_requires_a_selector() {
        let tool = MaterialsSummaryTool::new("http://localhost", Some("k".into()));
        assert!(tool.query(&serde_json::json!({"is_stable": true})).is_err());

        let params = tool
            .query(&serde_json::json!({"elements": "Li,O", "band_gap_min": 1.5, "limit": 500}))
            .unwrap();
        assert!(params.contains(&("elements".into(), "Li,O".into())));
        assert!(params.contains(&("band_gap_min".into(), "1.5".into())));
        assert!(params.contains(&("_limit".into(), "50".into())));
    }
}
