//! # matagent core
//!
//! Domain types, traits, and error definitions for the matagent reasoning
//! runtime. This crate has **no framework dependencies**: it defines the
//! model that the agent, provider, tool, and gateway crates implement against.
//!
//! ## Layout
//!
//! - [`tool`]: tool specs, argument schemas, the leaf/composite registry
//! - [`step`]: the append-only scratchpad of a single reasoning run
//! - [`event`]: externally visible step events and the per-channel bus
//! - [`provider`]: the opaque language-model completion contract
//! - [`session`]: conversation history keyed by channel id

pub mod agent;
pub mod channel;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod schema;
pub mod session;
pub mod step;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::AgentConfig;
pub use channel::ChannelId;
pub use error::{ParseError, ProviderError, RegistryError, RunError, ToolError};
pub use event::{AGENT_FINISH, ChannelEvent, EventBus, StepEvent, Subscription};
pub use message::{Conversation, Message, Role};
pub use provider::{Provider, ProviderFactory, ProviderRequest, ProviderResponse, StreamChunk};
pub use schema::{FieldKind, FieldSpec, InputSchema};
pub use session::{InMemorySessionStore, SessionStore};
pub use step::{FinalAnswer, Observation, Scratchpad, Step, StepAction, ToolInvocation};
pub use tool::{CompositeDef, CompositeTool, Tool, ToolCatalog, ToolEntry, ToolRegistry, ToolSpec};
