//! Prompt assembly for one planning round.
//!
//! Layout:
//! 1. system message: persona, tool descriptions, format instructions
//! 2. prior conversation turns of the channel (top-level run only)
//! 3. user message: the question followed by the rendered scratchpad

use matagent_core::message::Message;
use matagent_core::step::Scratchpad;
use matagent_core::tool::ToolRegistry;

pub const DEFAULT_PERSONA: &str = "Respond to the human as helpfully and accurately as possible.";

pub fn system_prompt(persona: Option<&str>, registry: &ToolRegistry, format_instructions: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(persona.unwrap_or(DEFAULT_PERSONA).trim());
    prompt.push_str(" You have access to the following tools:\n\n");
    if registry.is_empty() {
        prompt.push_str("(no tools)");
    } else {
        prompt.push_str(&registry.render_descriptions());
    }
    prompt.push_str("\n\n");
    prompt.push_str(format_instructions);
    prompt
}

pub fn user_prompt(question: &str, scratchpad: &Scratchpad) -> String {
    let mut prompt = format!("Question: {}\n", question.trim());
    if !scratchpad.is_empty() {
        prompt.push_str(&scratchpad.render());
        prompt.push_str("Thought:");
    }
    prompt
}

/// All messages for one planning call.
pub fn build_messages(
    system: &str,
    history: &[Message],
    question: &str,
    scratchpad: &Scratchpad,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(user_prompt(question, scratchpad)));
    messages
}
