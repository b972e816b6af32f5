//! The reasoning loop: Planning → Acting → Observing → … → Terminated.
//!
//! Each planning round asks the model for one decision. A tool decision is
//! acted on and its observation appended to the scratchpad; a final answer
//! ends the run. Composite tools are acted on by running a nested loop over
//! the composite's own registry, with its events tagged one level deeper.
//!
//! Bounds:
//! - at most `max_steps` non-terminal planning rounds (tool rounds and
//!   parse-error rounds both count)
//! - more than `max_consecutive_parse_errors` unparseable outputs in a row
//!   fails the run
//!
//! Cancellation is checked before every planning and acting phase and the
//! model call itself is raced against the token. A leaf tool call that is
//! already running is allowed to complete, but its result is discarded.

use futures::future::BoxFuture;
use matagent_core::agent::AgentConfig;
use matagent_core::channel::ChannelId;
use matagent_core::error::{ProviderError, RunError, ToolError};
use matagent_core::event::{EventBus, StepEvent};
use matagent_core::message::Message;
use matagent_core::provider::{Provider, ProviderRequest};
use matagent_core::step::{Scratchpad, StepAction, ToolInvocation};
use matagent_core::tool::{CompositeTool, ToolEntry, ToolRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::parser::{ActionParser, Decision, JsonBlobParser};
use crate::prompt;
use crate::run::{RunLifecycle, RunOutcome};

/// Stop sequence keeping the model from inventing its own observations.
const STOP_SEQUENCE: &str = "Observation";

/// Where a run publishes, how deep it is nested, and how it is stopped.
#[derive(Clone)]
pub struct RunContext {
    pub bus: Arc<EventBus>,
    pub channel: ChannelId,
    pub depth: u32,
    /// Enclosing composite tool names, outermost first
    pub path: Vec<String>,
    pub cancel: CancellationToken,
    /// Present on top-level runs owned by a [`crate::session::SessionManager`]
    pub lifecycle: Option<Arc<RunLifecycle>>,
}

impl RunContext {
    /// Context of a top-level run.
    pub fn root(bus: Arc<EventBus>, channel: ChannelId, cancel: CancellationToken) -> Self {
        Self {
            bus,
            channel,
            depth: 0,
            path: Vec::new(),
            cancel,
            lifecycle: None,
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<RunLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Context of a nested run driven by the composite tool `name`.
    fn child(&self, name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Self {
            bus: self.bus.clone(),
            channel: self.channel.clone(),
            depth: self.depth + 1,
            path,
            cancel: self.cancel.child_token(),
            lifecycle: None,
        }
    }

    /// Publish a non-terminal event. Nothing is published once cancelled.
    fn emit(&self, event: StepEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.bus.publish(&self.channel, self.depth, &self.path, event)
    }
}

enum PlanError {
    Cancelled,
    Provider(ProviderError),
}

/// A configured reasoning loop over one tool registry.
///
/// Cheap to construct; build one per request (the provider may carry a
/// request-scoped key) and share the registry.
pub struct ReasoningLoop {
    provider: Arc<dyn Provider>,
    parser: Arc<dyn ActionParser>,
    config: Arc<AgentConfig>,
    registry: Arc<ToolRegistry>,
    persona: Option<String>,
    max_steps: u32,
}

impl ReasoningLoop {
    pub fn new(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>, config: Arc<AgentConfig>) -> Self {
        Self {
            provider,
            parser: Arc::new(JsonBlobParser),
            persona: config.persona.clone(),
            max_steps: config.max_steps,
            config,
            registry,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ActionParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The loop that drives a composite tool.
    fn nested(&self, composite: &CompositeTool) -> ReasoningLoop {
        ReasoningLoop {
            provider: self.provider.clone(),
            parser: self.parser.clone(),
            config: self.config.clone(),
            registry: composite.registry.clone(),
            persona: composite.persona.clone(),
            max_steps: composite.max_steps.unwrap_or(self.config.max_steps),
        }
    }

    /// Run to completion, publishing every step to `ctx.bus`.
    ///
    /// `history` is the prior conversation of the channel; nested runs get
    /// none.
    pub fn run<'a>(&'a self, question: &'a str, history: &'a [Message], ctx: RunContext) -> BoxFuture<'a, RunOutcome> {
        Box::pin(self.drive(question, history, ctx))
    }

    async fn drive(&self, question: &str, history: &[Message], ctx: RunContext) -> RunOutcome {
        let system = prompt::system_prompt(
            self.persona.as_deref(),
            &self.registry,
            self.parser.format_instructions(),
        );
        let mut pad = Scratchpad::new();
        let mut rounds = 0u32;
        let mut parse_errors = 0u32;

        info!(
            channel = %ctx.channel,
            depth = ctx.depth,
            max_steps = self.max_steps,
            tools = self.registry.len(),
            "Reasoning run starting"
        );

        loop {
            if ctx.cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            if rounds >= self.max_steps {
                warn!(channel = %ctx.channel, depth = ctx.depth, rounds, "Step budget exhausted");
                return self.conclude(
                    &ctx,
                    &pad,
                    Err(RunError::StepBudgetExceeded {
                        max_steps: self.max_steps,
                    }),
                );
            }

            // ── Planning ──
            let messages = prompt::build_messages(&system, history, question, &pad);
            let text = match self.plan(messages, &ctx).await {
                Ok(text) => text,
                Err(PlanError::Cancelled) => return RunOutcome::Cancelled,
                Err(PlanError::Provider(e)) => {
                    warn!(channel = %ctx.channel, depth = ctx.depth, error = %e, "Model call failed");
                    return self.conclude(&ctx, &pad, Err(e.into()));
                }
            };

            let turn = match self.parser.parse(&text) {
                Ok(turn) => turn,
                Err(err) => {
                    rounds += 1;
                    parse_errors += 1;
                    let step = pad
                        .push_step(
                            "",
                            StepAction::ParseError {
                                message: err.message.clone(),
                            },
                        )
                        .index;
                    debug!(channel = %ctx.channel, step, parse_errors, "Unparseable model output");
                    ctx.emit(StepEvent::ParseFailed {
                        step,
                        message: err.message.clone(),
                    });
                    if parse_errors > self.config.max_consecutive_parse_errors {
                        return self.conclude(&ctx, &pad, Err(RunError::ParseErrorLimit { count: parse_errors }));
                    }
                    pad.observe(
                        step,
                        format!(
                            "Invalid or incomplete response ({}). Reply with exactly one action as a json blob.",
                            err.message
                        ),
                        true,
                    );
                    continue;
                }
            };
            parse_errors = 0;

            let call = match turn.decision {
                Decision::Final(answer) => {
                    pad.push_step(turn.thought, StepAction::Final(answer.clone()));
                    return self.conclude(&ctx, &pad, Ok(answer.text));
                }
                Decision::Tool(call) => call,
            };

            // ── Acting ──
            rounds += 1;
            let step = pad.push_step(turn.thought.clone(), StepAction::Tool(call.clone())).index;
            if ctx.cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            ctx.emit(StepEvent::ToolCallStarted {
                step,
                tool: call.tool.clone(),
                input: call.arguments.clone(),
                thought: turn.thought,
            });

            let (observation, is_error) = self.act(&call, &ctx).await;
            if ctx.cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            // ── Observing ──
            let observation = truncate(observation, self.config.max_observation_chars);
            pad.observe(step, observation.clone(), is_error);
            ctx.emit(StepEvent::ToolCallEnded {
                step,
                tool: call.tool,
                observation,
                is_error,
            });
        }
    }

    /// One model call. Deltas are published as token chunks when streaming.
    async fn plan(&self, messages: Vec<Message>, ctx: &RunContext) -> Result<String, PlanError> {
        let mut request = ProviderRequest::new(&self.config.model, messages);
        request.temperature = self.config.temperature;
        request.max_tokens = self.config.max_tokens;
        request.stop = vec![STOP_SEQUENCE.to_string()];

        if !self.config.stream_tokens {
            return tokio::select! {
                _ = ctx.cancel.cancelled() => Err(PlanError::Cancelled),
                response = self.provider.complete(request) => response
                    .map(|r| r.message.content)
                    .map_err(PlanError::Provider),
            };
        }

        request.stream = true;
        let mut rx = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(PlanError::Cancelled),
            rx = self.provider.stream(request) => rx.map_err(PlanError::Provider)?,
        };

        let mut text = String::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(PlanError::Cancelled),
                chunk = rx.recv() => chunk,
            };
            match chunk {
                None => break,
                Some(Err(e)) => return Err(PlanError::Provider(e)),
                Some(Ok(chunk)) => {
                    if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                        ctx.emit(StepEvent::TokenChunk {
                            content: content.clone(),
                        });
                        text.push_str(&content);
                    }
                    if chunk.done {
                        break;
                    }
                }
            }
        }
        Ok(text)
    }

    /// Execute one tool call and return its observation.
    async fn act(&self, call: &ToolInvocation, ctx: &RunContext) -> (String, bool) {
        let Some(entry) = self.registry.get(&call.tool) else {
            let err = ToolError::NotFound(call.tool.clone());
            debug!(channel = %ctx.channel, tool = %call.tool, "Unknown tool requested");
            return (
                format!(
                    "{err}. Valid tools are: {}",
                    self.registry.tool_names().join(", ")
                ),
                true,
            );
        };

        let arguments = match entry.spec().input_schema.validate(&call.arguments) {
            Ok(args) => args,
            Err(reason) => {
                let err = ToolError::InvalidArguments {
                    tool_name: call.tool.clone(),
                    reason,
                };
                return (err.to_string(), true);
            }
        };

        match entry {
            ToolEntry::Leaf(tool) => {
                debug!(channel = %ctx.channel, depth = ctx.depth, tool = %call.tool, "Invoking tool");
                match tool.invoke(arguments).await {
                    Ok(output) => (output, false),
                    Err(e) => {
                        warn!(tool = %call.tool, error = %e, "Tool failed");
                        (e.to_string(), true)
                    }
                }
            }
            ToolEntry::Composite(composite) => {
                let Some(input) = arguments["input"].as_str().map(str::to_string) else {
                    let err = ToolError::InvalidArguments {
                        tool_name: call.tool.clone(),
                        reason: "'input' must be a question string".into(),
                    };
                    return (err.to_string(), true);
                };
                let nested = self.nested(composite);
                let child = ctx.child(&composite.spec.name);
                debug!(channel = %ctx.channel, depth = child.depth, tool = %call.tool, "Entering composite tool");
                match nested.run(&input, &[], child).await {
                    RunOutcome::Finished { answer, .. } => (answer, false),
                    RunOutcome::Failed(err) => (format!("{} failed: {err}", composite.spec.name), true),
                    RunOutcome::Cancelled => (format!("{} was cancelled", composite.spec.name), true),
                }
            }
        }
    }

    /// Publish the terminal event and produce the outcome.
    fn conclude(&self, ctx: &RunContext, pad: &Scratchpad, result: Result<String, RunError>) -> RunOutcome {
        if ctx.cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        if let Some(lifecycle) = &ctx.lifecycle
            && !lifecycle.try_finish()
        {
            return RunOutcome::Cancelled;
        }

        let steps = pad.len() as u32;
        let (event, outcome) = match result {
            Ok(answer) => {
                info!(channel = %ctx.channel, depth = ctx.depth, steps, tool_calls = pad.tool_calls(), "Reasoning run finished");
                (
                    StepEvent::Finished {
                        answer: answer.clone(),
                        steps,
                    },
                    RunOutcome::Finished { answer, steps },
                )
            }
            Err(err) => {
                info!(channel = %ctx.channel, depth = ctx.depth, steps, reason = %err, "Reasoning run failed");
                (
                    StepEvent::Failed {
                        reason: err.to_string(),
                    },
                    RunOutcome::Failed(err),
                )
            }
        };
        ctx.bus.publish(&ctx.channel, ctx.depth, &ctx.path, event);
        outcome
    }
}

fn truncate(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("... [truncated]");
    cut
}
