//! The scratchpad of a single reasoning run.
//!
//! Every planning round appends one [`Step`]; every tool round appends one
//! [`Observation`] that refers back to its step. The scratchpad is owned by
//! exactly one run and is never shared.

use serde::{Deserialize, Serialize};

/// A parsed request to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: serde_json::Value,
}

/// The model's answer to the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
}

/// What the model decided to do in one planning round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    Tool(ToolInvocation),
    Final(FinalAnswer),
    /// The output did not match the action grammar
    ParseError { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub index: u32,
    pub thought: String,
    pub action: StepAction,
}

impl Step {
    pub fn is_final(&self) -> bool {
        matches!(self.action, StepAction::Final(_))
    }
}

/// Result of acting on a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub source_step: u32,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Step(usize),
    Observation(usize),
}

/// Append-only log of steps and observations.
#[derive(Debug, Default)]
pub struct Scratchpad {
    steps: Vec<Step>,
    observations: Vec<Observation>,
    order: Vec<Entry>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Its index is assigned here so indices never have gaps.
    pub fn push_step(&mut self, thought: impl Into<String>, action: StepAction) -> &Step {
        let index = self.steps.len() as u32;
        self.steps.push(Step {
            index,
            thought: thought.into(),
            action,
        });
        self.order.push(Entry::Step(self.steps.len() - 1));
        &self.steps[self.steps.len() - 1]
    }

    /// Record the observation for `source_step`.
    pub fn observe(&mut self, source_step: u32, content: impl Into<String>, is_error: bool) {
        self.observations.push(Observation {
            source_step,
            content: content.into(),
            is_error,
        });
        self.order.push(Entry::Observation(self.observations.len() - 1));
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of tool invocations issued so far.
    pub fn tool_calls(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.action, StepAction::Tool(_)))
            .count()
    }

    /// Render the log the model sees on its next planning round.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.order {
            match *entry {
                Entry::Step(i) => {
                    let step = &self.steps[i];
                    if !step.thought.is_empty() {
                        out.push_str("Thought: ");
                        out.push_str(step.thought.trim());
                        out.push('\n');
                    }
                    match &step.action {
                        StepAction::Tool(call) => {
                            let blob = serde_json::json!({
                                "action": call.tool,
                                "action_input": call.arguments,
                            });
                            out.push_str("Action:\n```\n");
                            out.push_str(&blob.to_string());
                            out.push_str("\n```\n");
                        }
                        StepAction::Final(answer) => {
                            out.push_str("Final Answer: ");
                            out.push_str(&answer.text);
                            out.push('\n');
                        }
                        StepAction::ParseError { .. } => {}
                    }
                }
                Entry::Observation(i) => {
                    out.push_str("Observation: ");
                    out.push_str(&self.observations[i].content);
                    out.push('\n');
                }
            }
        }
        out
    }
}
