//! The reasoning loop of matagent.
//!
//! A run follows a **Plan → Act → Observe** cycle:
//!
//! 1. **Plan**: render the persona, tool descriptions and scratchpad into
//!    a prompt and ask the model for one decision
//! 2. **Act**: invoke the chosen tool; a composite tool runs a nested loop
//!    over its own registry
//! 3. **Observe**: append the result to the scratchpad and loop back
//!
//! The run ends with a final answer, or fails on the step budget, too many
//! unparseable replies, or a provider error. Every step is published to the
//! run's channel on the [`EventBus`](matagent_core::event::EventBus), and a
//! [`SessionManager`] ties each run to the client stream consuming it.

pub mod parser;
pub mod prompt;
pub mod reasoning;
pub mod run;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use parser::{ActionParser, Decision, JsonBlobParser, ParsedTurn};
pub use reasoning::{ReasoningLoop, RunContext};
pub use run::{CancelOutcome, RunHandle, RunLifecycle, RunOutcome, RunState};
pub use session::{SessionError, SessionManager, StreamSession};
