//! Step events and the per-channel event bus.
//!
//! A reasoning run publishes [`StepEvent`]s as it goes. The bus stamps each
//! one with its channel, a per-channel sequence number, and the nesting
//! depth, then fans it out to every subscriber of that channel.
//!
//! Policies:
//! - publishing never blocks; a subscriber that falls behind loses the
//!   oldest events (drop-oldest) and a warning is logged
//! - the last `replay_capacity` events are kept so a late subscriber still
//!   sees the start of the run
//! - publishing to a channel that is not open is a no-op
//! - once a top-level terminal event is published, the channel accepts
//!   nothing else

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::channel::ChannelId;

/// Line written after the last event of a streamed response.
pub const AGENT_FINISH: &str = "AGENT_FINISH";

/// Something observable that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    ToolCallStarted {
        step: u32,
        tool: String,
        input: serde_json::Value,
        thought: String,
    },
    ToolCallEnded {
        step: u32,
        tool: String,
        observation: String,
        is_error: bool,
    },
    /// Raw model output delta
    TokenChunk { content: String },
    /// Model output did not parse; the run will re-plan
    ParseFailed { step: u32, message: String },
    Finished { answer: String, steps: u32 },
    Failed { reason: String },
}

impl StepEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepEvent::Finished { .. } | StepEvent::Failed { .. })
    }
}

/// A [`StepEvent`] as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub seq: u64,
    /// 0 for the top-level run, n for a run nested n composites deep
    pub depth: u32,
    /// Names of the enclosing composite tools, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    pub event: StepEvent,
    pub timestamp: DateTime<Utc>,
}

impl ChannelEvent {
    /// A `Finished`/`Failed` of the top-level run: nothing follows it.
    pub fn is_final(&self) -> bool {
        self.depth == 0 && self.event.is_terminal()
    }

    /// One JSON object terminated by a newline.
    pub fn to_json_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(e) => format!("{{\"type\":\"failed\",\"reason\":\"unserializable event: {e}\"}}\n"),
        }
    }

    /// Prefix-tagged plain text record.
    ///
    /// Token chunks are passed through untouched so the client can render
    /// them as they arrive; every other event is written on a line of its
    /// own.
    pub fn to_text_record(&self) -> String {
        let scope = if self.path.is_empty() {
            String::new()
        } else {
            format!("[{}] ", self.path.join("/"))
        };
        match &self.event {
            StepEvent::TokenChunk { content } => content.clone(),
            StepEvent::ToolCallStarted { tool, input, .. } => {
                let action = serde_json::json!({ "action": tool, "action_input": input });
                format!("\n{scope}AGENT_ACTION: {action}\n")
            }
            StepEvent::ToolCallEnded { observation, is_error, .. } => {
                let marker = if *is_error { " (error)" } else { "" };
                format!("\n{scope}TOOL_END{marker}: {observation}\n")
            }
            StepEvent::ParseFailed { message, .. } => {
                format!("\n{scope}PARSE_ERROR: {message}\n")
            }
            StepEvent::Finished { answer, .. } => format!("\n{scope}FINAL_ANSWER: {answer}\n"),
            StepEvent::Failed { reason } => format!("\n{scope}AGENT_ERROR: {reason}\n"),
        }
    }
}

struct ChannelState {
    sender: broadcast::Sender<Arc<ChannelEvent>>,
    replay: VecDeque<Arc<ChannelEvent>>,
    next_seq: u64,
    terminated: bool,
}

/// Per-channel broadcast fan-out.
pub struct EventBus {
    channels: Mutex<HashMap<ChannelId, ChannelState>>,
    capacity: usize,
    replay_capacity: usize,
}

impl EventBus {
    /// `capacity` bounds each subscriber's buffer; `replay_capacity` bounds
    /// the per-channel backlog handed to new subscribers.
    pub fn new(capacity: usize, replay_capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            replay_capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelId, ChannelState>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a channel for publishing. Returns false if it was already open
    /// and still live.
    ///
    /// A channel whose run already terminated is reset, so the same id can
    /// carry the next turn of a conversation.
    pub fn open(&self, channel: &ChannelId) -> bool {
        let mut channels = self.lock();
        if let Some(state) = channels.get(channel)
            && !state.terminated
        {
            return false;
        }
        let (sender, _) = broadcast::channel(self.capacity);
        channels.insert(
            channel.clone(),
            ChannelState {
                sender,
                replay: VecDeque::with_capacity(self.replay_capacity),
                next_seq: 0,
                terminated: false,
            },
        );
        debug!(channel = %channel, "Event channel opened");
        true
    }

    /// Publish an event. Never blocks. Returns whether it was accepted.
    pub fn publish(&self, channel: &ChannelId, depth: u32, path: &[String], event: StepEvent) -> bool {
        let mut channels = self.lock();
        let Some(state) = channels.get_mut(channel) else {
            debug!(channel = %channel, "Dropping event for unopened channel");
            return false;
        };
        if state.terminated {
            debug!(channel = %channel, "Dropping event published after run terminated");
            return false;
        }

        let event = Arc::new(ChannelEvent {
            channel: channel.clone(),
            seq: state.next_seq,
            depth,
            path: path.to_vec(),
            event,
            timestamp: Utc::now(),
        });
        state.next_seq += 1;
        if event.is_final() {
            state.terminated = true;
        }

        if self.replay_capacity > 0 {
            if state.replay.len() == self.replay_capacity {
                state.replay.pop_front();
            }
            state.replay.push_back(event.clone());
        }

        // No subscribers is fine: the replay buffer covers late joiners.
        let _ = state.sender.send(event);
        true
    }

    /// Subscribe to a channel. The retained backlog is delivered first.
    pub fn subscribe(&self, channel: &ChannelId) -> Option<Subscription> {
        let channels = self.lock();
        let state = channels.get(channel)?;
        Some(Subscription {
            channel: channel.clone(),
            backlog: state.replay.clone(),
            rx: state.sender.subscribe(),
            last_seq: None,
        })
    }

    /// Close a channel. Subscribers drain what they have buffered and then
    /// see the end of the stream.
    pub fn close(&self, channel: &ChannelId) {
        if self.lock().remove(channel).is_some() {
            debug!(channel = %channel, "Event channel closed");
        }
    }

    pub fn is_open(&self, channel: &ChannelId) -> bool {
        self.lock().contains_key(channel)
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Receiving half of one channel.
pub struct Subscription {
    channel: ChannelId,
    backlog: VecDeque<Arc<ChannelEvent>>,
    rx: broadcast::Receiver<Arc<ChannelEvent>>,
    last_seq: Option<u64>,
}

impl Subscription {
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Next event in publish order, or `None` once the channel is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<Arc<ChannelEvent>> {
        if let Some(event) = self.backlog.pop_front() {
            self.last_seq = Some(event.seq);
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.last_seq.is_some_and(|seen| event.seq <= seen) {
                        continue;
                    }
                    self.last_seq = Some(event.seq);
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged; oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
