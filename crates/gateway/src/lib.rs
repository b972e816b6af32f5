//! HTTP gateway for matagent.
//!
//! Endpoints:
//!
//! - `POST /chat`                   run the agent, stream its events
//! - `POST /channels/{id}/cancel`   cancel the live run of a channel
//! - `GET  /channels/{id}/history`  stored conversation of a channel
//! - `GET  /tools`                  tools visible to the top-level run
//! - `GET  /health`                 liveness
//!
//! `/chat` answers with a `text/plain` body: a `[channel_id]<id>` line, one
//! record per event, then the `AGENT_FINISH` line.
//!
//! Built on Axum.

use axum::body::{Body, Bytes};
use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use matagent_agent::{CancelOutcome, ReasoningLoop, SessionError, SessionManager, StreamSession};
use matagent_config::{AppConfig, WireFormat};
use matagent_core::agent::AgentConfig;
use matagent_core::channel::ChannelId;
use matagent_core::error::{ProviderError, ToolError};
use matagent_core::event::{AGENT_FINISH, ChannelEvent, EventBus};
use matagent_core::message::Message;
use matagent_core::provider::ProviderFactory;
use matagent_core::session::InMemorySessionStore;
use matagent_core::tool::ToolRegistry;
use matagent_providers::ConfiguredProviderFactory;
use matagent_tools::Toolset;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: Arc<AgentConfig>,
    pub factory: Arc<dyn ProviderFactory>,
    pub registry: Arc<ToolRegistry>,
    /// Rebuilds the registry for requests that bring their own
    /// Materials Project key
    pub toolset: Toolset,
    pub sessions: Arc<SessionManager>,
    pub verify_credentials: bool,
    pub wire_format: WireFormat,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Assemble the state from its parts; the bus and session store are
    /// sized from `config`.
    pub fn new(config: &AppConfig, factory: Arc<dyn ProviderFactory>, registry: ToolRegistry) -> Self {
        let bus = Arc::new(EventBus::new(
            config.event_bus.capacity,
            config.event_bus.replay_capacity,
        ));
        let store = Arc::new(InMemorySessionStore::new(config.sessions.max_sessions));
        let sessions = SessionManager::new(bus, store, Duration::from_millis(config.sessions.cancel_grace_ms));
        Self {
            agent: Arc::new(config.agent_config()),
            factory,
            registry: Arc::new(registry),
            toolset: Toolset::new(config),
            sessions: Arc::new(sessions),
            verify_credentials: config.gateway.verify_credentials,
            wire_format: config.gateway.wire_format,
        }
    }

    /// State backed by the configured provider and the default tools.
    pub fn from_config(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let registry = matagent_tools::default_registry(config)?;
        let factory = Arc::new(ConfiguredProviderFactory::from_config(config));
        Ok(Self::new(config, factory, registry))
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/tools", get(tools_handler))
        .route("/chat", post(chat_handler))
        .route("/channels/{id}/history", get(history_handler))
        .route("/channels/{id}/cancel", post(cancel_handler))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(&config)?);
    let app = build_router(state);

    info!(addr = %addr, model = %config.model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    text: String,
    /// Channel of an earlier turn to continue
    #[serde(default)]
    channel_id: Option<String>,
    /// Request-scoped provider key; the configured key is used otherwise
    #[serde(default)]
    api_key: Option<String>,
    /// Request-scoped Materials Project key
    #[serde(default)]
    mp_api_key: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize, Deserialize)]
struct ToolInfo {
    name: String,
    description: String,
    composite: bool,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
    /// The descriptions exactly as the model sees them
    rendered: String,
}

#[derive(Serialize, Deserialize)]
struct HistoryResponse {
    channel_id: String,
    messages: Vec<Message>,
}

#[derive(Serialize, Deserialize)]
struct CancelResponse {
    channel_id: String,
    outcome: String,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools = state
        .registry
        .entries()
        .map(|entry| ToolInfo {
            name: entry.name().to_string(),
            description: entry.spec().description.clone(),
            composite: entry.is_composite(),
            parameters: entry.spec().input_schema.to_json_schema(),
        })
        .collect();
    Json(ToolListResponse {
        tools,
        rendered: state.registry.render_descriptions(),
    })
}

/// `POST /chat`: start a run and stream its events as they happen.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "text must not be empty"));
    }

    let provider = state
        .factory
        .build(payload.api_key.as_deref())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    if state.verify_credentials
        && let Err(e) = provider.verify_credentials().await
    {
        warn!(provider = provider.name(), error = %e, "Credential check failed");
        let status = match e {
            ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        return Err(api_error(status, e));
    }

    let mp_key = payload.mp_api_key.as_deref().filter(|k| !k.trim().is_empty());
    if state.verify_credentials
        && let Err(e) = state.toolset.verify_materials_key(mp_key).await
    {
        warn!(error = %e, "Materials Project key check failed");
        return Err(match e {
            ToolError::Unauthorized { .. } => api_error(StatusCode::BAD_REQUEST, format!("Invalid MP API Key: {e}")),
            _ => api_error(StatusCode::BAD_GATEWAY, e),
        });
    }

    let registry = match mp_key {
        Some(key) => Arc::new(
            state
                .toolset
                .registry(Some(key))
                .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?,
        ),
        None => state.registry.clone(),
    };

    let channel = state
        .sessions
        .allocate_channel(payload.channel_id.as_deref())
        .await;
    let reasoning = Arc::new(ReasoningLoop::new(provider, registry, state.agent.clone()));

    let session = state
        .sessions
        .start(channel.clone(), text.to_string(), reasoning)
        .await
        .map_err(|e| match e {
            SessionError::ChannelBusy(_) => api_error(StatusCode::CONFLICT, e),
            SessionError::Unavailable(_) => api_error(StatusCode::SERVICE_UNAVAILABLE, e),
        })?;

    info!(channel = %channel, text_len = text.len(), "Chat run started");

    let body = Body::from_stream(event_stream(session, state.wire_format));
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

async fn history_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let channel = ChannelId::from(&id);
    let store = state.sessions.store();
    if !store.contains(&channel).await {
        return Err(api_error(StatusCode::NOT_FOUND, format!("Channel {id} not found")));
    }
    Ok(Json(HistoryResponse {
        channel_id: channel.to_string(),
        messages: store.history(&channel).await,
    }))
}

async fn cancel_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let channel = ChannelId::from(&id);
    let outcome = state
        .sessions
        .cancel(&channel)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Channel {id} has no active run")))?;
    let outcome = match outcome {
        CancelOutcome::Cancelled => "cancelled",
        CancelOutcome::AlreadyFinished => "already_finished",
        CancelOutcome::AlreadyCancelled => "already_cancelled",
    };
    Ok(Json(CancelResponse {
        channel_id: channel.to_string(),
        outcome: outcome.into(),
    }))
}

// ── Streaming body ────────────────────────────────────────────────────────

fn render(event: &ChannelEvent, format: WireFormat) -> String {
    match format {
        WireFormat::Json => event.to_json_line(),
        WireFormat::Text => event.to_text_record(),
    }
}

struct BodyState {
    session: Option<StreamSession>,
    header: Option<String>,
    format: WireFormat,
    at_line_start: bool,
}

/// Header line, one record per event, then the sentinel line.
///
/// Dropping the stream (client disconnect) drops the session, which
/// cancels the run.
fn event_stream(session: StreamSession, format: WireFormat) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    let state = BodyState {
        header: Some(format!("[channel_id]{}\n", session.channel())),
        session: Some(session),
        format,
        at_line_start: true,
    };
    futures::stream::unfold(state, |mut state| async move {
        if let Some(header) = state.header.take() {
            return Some((Ok(Bytes::from(header)), state));
        }
        let mut session = state.session.take()?;
        match session.next_event().await {
            Some(event) => {
                let record = render(&event, state.format);
                if !record.is_empty() {
                    state.at_line_start = record.ends_with('\n');
                }
                state.session = Some(session);
                Some((Ok(Bytes::from(record)), state))
            }
            None => {
                let lead = if state.at_line_start { "" } else { "\n" };
                Some((Ok(Bytes::from(format!("{lead}{AGENT_FINISH}\n"))), state))
            }
        }
    })
}
