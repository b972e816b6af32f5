//! Turning raw model output into a decision.
//!
//! The model is asked to answer in the JSON-blob action format:
//!
//! ````text
//! Thought: I need the band gap of silicon.
//! Action:
//! ```
//! {"action": "materials_summary", "action_input": {"formula": "Si"}}
//! ```
//! ````
//!
//! and to finish with `{"action": "Final Answer", "action_input": "..."}`.
//! A plain `Final Answer: ...` line is accepted as a fallback.

use matagent_core::error::ParseError;
use matagent_core::step::{FinalAnswer, ToolInvocation};
use serde_json::Value;

/// Action name that ends the run.
pub const FINAL_ANSWER_ACTION: &str = "Final Answer";

/// What the model decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Tool(ToolInvocation),
    Final(FinalAnswer),
}

/// A successfully parsed model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTurn {
    pub thought: String,
    pub decision: Decision,
}

/// Parses model output into a [`ParsedTurn`].
pub trait ActionParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<ParsedTurn, ParseError>;

    /// Instructions appended to the system prompt describing the format
    /// this parser understands.
    fn format_instructions(&self) -> &str;
}

/// Parser for the JSON-blob action format.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonBlobParser;

const FORMAT_INSTRUCTIONS: &str = r#"Use a json blob to specify a tool by providing an action key (tool name) and an action_input key (tool input).

Valid "action" values: "Final Answer" or one of the tool names above.

Provide only ONE action per $JSON_BLOB, as shown:

```
{
  "action": $TOOL_NAME,
  "action_input": $INPUT
}
```

Follow this format:

Question: input question to answer
Thought: consider previous and subsequent steps
Action:
```
$JSON_BLOB
```
Observation: action result
... (repeat Thought/Action/Observation N times)
Thought: I know what to respond
Action:
```
{
  "action": "Final Answer",
  "action_input": "Final response to human"
}
```

Begin! Reminder to ALWAYS respond with a valid json blob of a single action. Format is Action:```$JSON_BLOB```then Observation"#;

impl ActionParser for JsonBlobParser {
    fn parse(&self, text: &str) -> Result<ParsedTurn, ParseError> {
        if let Some((start, blob)) = find_action_blob(text) {
            let thought = extract_thought(&text[..start]);
            return decision_from_blob(blob).map(|decision| ParsedTurn { thought, decision });
        }

        if let Some(pos) = text.find("Final Answer:") {
            let answer = text[pos + "Final Answer:".len()..].trim();
            if !answer.is_empty() {
                return Ok(ParsedTurn {
                    thought: extract_thought(&text[..pos]),
                    decision: Decision::Final(FinalAnswer {
                        text: answer.to_string(),
                    }),
                });
            }
        }

        Err(ParseError::new(format!(
            "no action found in model output: {}",
            preview(text)
        )))
    }

    fn format_instructions(&self) -> &str {
        FORMAT_INSTRUCTIONS
    }
}

/// First JSON object in `text` that carries an `action` key, together with
/// the byte offset where it (or its enclosing code fence) starts.
fn find_action_blob(text: &str) -> Option<(usize, Value)> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find('{') {
        let start = search_from + rel;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next()
            && value.get("action").is_some()
        {
            let fence = text[..start].rfind("```").unwrap_or(start);
            let action = text[..start].rfind("Action:").unwrap_or(fence);
            return Some((action.min(fence), value));
        }
        search_from = start + 1;
    }
    None
}

fn decision_from_blob(blob: Value) -> Result<Decision, ParseError> {
    let action = blob["action"]
        .as_str()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ParseError::new("\"action\" must be a non-empty string"))?;
    let input = blob.get("action_input").cloned().unwrap_or(Value::Null);

    if action == FINAL_ANSWER_ACTION {
        let text = match input {
            Value::String(s) => s,
            Value::Null => return Err(ParseError::new("final answer has no action_input")),
            other => other.to_string(),
        };
        return Ok(Decision::Final(FinalAnswer { text }));
    }

    Ok(Decision::Tool(ToolInvocation {
        tool: action.to_string(),
        arguments: input,
    }))
}

fn extract_thought(prefix: &str) -> String {
    let prefix = prefix.trim();
    let prefix = match prefix.rfind("Thought:") {
        Some(pos) => &prefix[pos + "Thought:".len()..],
        None => prefix,
    };
    prefix
        .trim_end_matches("Action:")
        .trim_end_matches("```json")
        .trim_end_matches("```")
        .trim()
        .to_string()
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > 120 {
        let cut: String = trimmed.chars().take(120).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}
