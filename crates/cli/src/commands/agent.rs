//! `matagent agent`: Interactive or single-question chat mode.

use matagent_agent::ReasoningLoop;
use matagent_config::AppConfig;
use matagent_core::channel::ChannelId;
use matagent_core::event::StepEvent;
use matagent_gateway::GatewayState;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!("    MATAGENT_API_KEY=sk-...   (takes precedence)");
        eprintln!();
        eprintln!("  Or add api_key to {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let state = GatewayState::from_config(&config)?;

    if let Some(question) = message {
        let channel = state.sessions.allocate_channel(None).await;
        ask(&state, channel, question).await?;
        return Ok(());
    }

    println!();
    println!("  matagent: Interactive Mode");
    println!();
    println!("  Model:     {}", config.model);
    println!("  Tools:     {}", state.registry.tool_names().join(", "));
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let channel = state.sessions.allocate_channel(None).await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        if !line.is_empty()
            && let Err(e) = ask(&state, channel.clone(), line.to_string()).await
        {
            eprintln!("  [Error] {e}");
        }
        print!("  You > ");
        std::io::stdout().flush()?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run one question on `channel` and print its steps as they happen.
async fn ask(state: &GatewayState, channel: ChannelId, question: String) -> Result<(), Box<dyn std::error::Error>> {
    let provider = state.factory.build(None)?;
    let reasoning = Arc::new(ReasoningLoop::new(
        provider,
        state.registry.clone(),
        state.agent.clone(),
    ));
    let mut session = state.sessions.start(channel, question, reasoning).await?;

    while let Some(event) = session.next_event().await {
        let indent = "  ".repeat(event.depth as usize + 1);
        match &event.event {
            StepEvent::TokenChunk { .. } => {}
            StepEvent::ToolCallStarted { tool, input, .. } => println!("{indent}-> {tool} {input}"),
            StepEvent::ToolCallEnded { observation, is_error, .. } => {
                let marker = if *is_error { "!!" } else { "<-" };
                for line in observation.lines().take(8) {
                    println!("{indent}{marker} {line}");
                }
            }
            StepEvent::ParseFailed { message, .. } => println!("{indent}?? {message}"),
            StepEvent::Finished { answer, .. } if event.is_final() => {
                println!();
                for line in answer.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            StepEvent::Finished { answer, .. } => println!("{indent}== {answer}"),
            StepEvent::Failed { reason } => eprintln!("{indent}[Run failed] {reason}"),
        }
    }
    Ok(())
}
