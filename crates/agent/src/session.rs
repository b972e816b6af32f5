//! Streamed runs: one live run per channel, bound to the client stream
//! that consumes its events.
//!
//! [`SessionManager::start`] spawns the reasoning loop and hands back a
//! [`StreamSession`]. The session forwards the channel's events until the
//! depth-0 terminal event. Dropping it early (the client went away)
//! cancels the run, and a reaper aborts the task if it has not stopped
//! within the grace period.
//!
//! The producer task and the session share a `ChannelLease`; whichever
//! lets go last closes the bus channel and frees the channel for the next
//! turn.

use matagent_core::channel::ChannelId;
use matagent_core::error::RunError;
use matagent_core::event::{ChannelEvent, EventBus, StepEvent, Subscription};
use matagent_core::message::Message;
use matagent_core::session::SessionStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reasoning::{ReasoningLoop, RunContext};
use crate::run::{CancelOutcome, RunHandle, RunLifecycle, RunOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Channel {0} already has an active run")]
    ChannelBusy(ChannelId),

    #[error("Channel {0} could not be opened")]
    Unavailable(ChannelId),
}

type RunTable = Arc<Mutex<HashMap<ChannelId, Arc<RunHandle>>>>;

fn lock(runs: &RunTable) -> MutexGuard<'_, HashMap<ChannelId, Arc<RunHandle>>> {
    runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the live runs of every channel.
pub struct SessionManager {
    bus: Arc<EventBus>,
    store: Arc<dyn SessionStore>,
    runs: RunTable,
    grace: Duration,
}

impl SessionManager {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn SessionStore>, grace: Duration) -> Self {
        Self {
            bus,
            store,
            runs: Arc::new(Mutex::new(HashMap::new())),
            grace,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Pick the channel for a new request.
    ///
    /// A requested id is reused when it names a known conversation or a
    /// live run; anything else gets a freshly minted id.
    pub async fn allocate_channel(&self, requested: Option<&str>) -> ChannelId {
        if let Some(requested) = requested.map(ChannelId::from).filter(|c| !c.as_str().is_empty()) {
            if self.is_active(&requested) || self.store.contains(&requested).await {
                return requested;
            }
            debug!(channel = %requested, "Unknown channel requested; minting a fresh one");
        }
        loop {
            let channel = ChannelId::new();
            if !self.is_active(&channel) && !self.bus.is_open(&channel) && !self.store.contains(&channel).await {
                return channel;
            }
        }
    }

    pub fn is_active(&self, channel: &ChannelId) -> bool {
        lock(&self.runs).contains_key(channel)
    }

    pub fn active_runs(&self) -> usize {
        lock(&self.runs).len()
    }

    /// Cancel the live run of a channel, if there is one.
    ///
    /// Listeners still attached to the channel receive a depth-0 `Failed`
    /// event before their stream ends. A client that simply disconnects
    /// cancels through [`StreamSession`]'s drop instead and publishes
    /// nothing.
    pub fn cancel(&self, channel: &ChannelId) -> Option<CancelOutcome> {
        let handle = lock(&self.runs).get(channel).cloned()?;
        let outcome = handle.cancel_with(|| {
            self.bus.publish(
                channel,
                0,
                &[],
                StepEvent::Failed {
                    reason: RunError::Cancelled.to_string(),
                },
            );
        });
        Some(outcome)
    }

    /// Start a run on `channel` and return the stream of its events.
    pub async fn start(
        &self,
        channel: ChannelId,
        question: String,
        reasoning: Arc<ReasoningLoop>,
    ) -> Result<StreamSession, SessionError> {
        let history = self.store.history(&channel).await;
        let token = CancellationToken::new();
        let lifecycle = Arc::new(RunLifecycle::new());
        let handle = Arc::new(RunHandle::new(channel.clone(), token.clone(), lifecycle.clone()));

        {
            let mut runs = lock(&self.runs);
            if runs.contains_key(&channel) || !self.bus.open(&channel) {
                warn!(channel = %channel, "Rejecting run on busy channel");
                return Err(SessionError::ChannelBusy(channel));
            }
            runs.insert(channel.clone(), handle.clone());
        }

        let lease = Arc::new(ChannelLease {
            bus: self.bus.clone(),
            runs: self.runs.clone(),
            channel: channel.clone(),
            run_id: handle.run_id.clone(),
        });
        let Some(subscription) = self.bus.subscribe(&channel) else {
            return Err(SessionError::Unavailable(channel));
        };

        info!(
            channel = %channel,
            run_id = %handle.run_id,
            history = history.len(),
            "Starting run"
        );

        let ctx = RunContext::root(self.bus.clone(), channel.clone(), token).with_lifecycle(lifecycle);
        let store = self.store.clone();
        let producer_lease = lease.clone();
        let task = tokio::spawn(async move {
            let _lease = producer_lease;
            let outcome = reasoning.run(&question, &history, ctx).await;
            if let RunOutcome::Finished { answer, .. } = &outcome {
                store
                    .append(&channel, vec![Message::user(question.clone()), Message::assistant(answer.clone())])
                    .await;
            }
            outcome
        });
        handle.attach(task);

        Ok(StreamSession {
            subscription,
            handle,
            _lease: lease,
            grace: self.grace,
            finished: false,
            settled: false,
        })
    }
}

/// Releases a channel once neither the producer nor the stream needs it.
struct ChannelLease {
    bus: Arc<EventBus>,
    runs: RunTable,
    channel: ChannelId,
    run_id: String,
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        let mut runs = lock(&self.runs);
        if runs.get(&self.channel).is_some_and(|h| h.run_id == self.run_id) {
            runs.remove(&self.channel);
            self.bus.close(&self.channel);
            debug!(channel = %self.channel, run_id = %self.run_id, "Channel released");
        }
    }
}

/// The client-facing end of one run.
pub struct StreamSession {
    subscription: Subscription,
    handle: Arc<RunHandle>,
    _lease: Arc<ChannelLease>,
    grace: Duration,
    finished: bool,
    settled: bool,
}

impl StreamSession {
    pub fn channel(&self) -> &ChannelId {
        &self.handle.channel
    }

    pub fn handle(&self) -> &Arc<RunHandle> {
        &self.handle
    }

    /// Next event of the run, or `None` once the run has ended.
    ///
    /// After the terminal event, the next call waits for the run task to
    /// wind down (history written) before reporting the end.
    pub async fn next_event(&mut self) -> Option<Arc<ChannelEvent>> {
        if self.finished {
            self.settle().await;
            return None;
        }

        let event = tokio::select! {
            biased;
            event = self.subscription.recv() => event,
            _ = self.handle.token().cancelled() => None,
        };

        match event {
            Some(event) => {
                if event.is_final() {
                    self.finished = true;
                    self.handle.cancel();
                }
                Some(event)
            }
            None => {
                self.finished = true;
                self.settle().await;
                None
            }
        }
    }

    async fn settle(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        if tokio::time::timeout(self.grace, self.handle.join()).await.is_err() {
            warn!(channel = %self.handle.channel, "Run did not stop within the grace period");
            self.handle.abort();
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.handle.cancel() != CancelOutcome::Cancelled {
            return;
        }
        info!(channel = %self.handle.channel, "Stream closed before the run finished");
        let handle = self.handle.clone();
        let grace = self.grace;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                tokio::time::sleep(grace).await;
                handle.abort();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use matagent_core::agent::AgentConfig;
    use matagent_core::session::InMemorySessionStore;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(EventBus::new(64, 64)),
            Arc::new(InMemorySessionStore::default()),
            Duration::from_secs(2),
        )
    }

    fn reasoning(provider: ScriptedProvider) -> Arc<ReasoningLoop> {
        Arc::new(ReasoningLoop::new(
            Arc::new(provider),
            Arc::new(echo_registry()),
            Arc::new(AgentConfig::new("m").with_token_streaming(false)),
        ))
    }

    async fn wait_until_idle(manager: &SessionManager, channel: &ChannelId) {
        for _ in 0..200 {
            if !manager.is_active(channel) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("channel {channel} never became idle");
    }

    #[tokio::test]
    async fn streams_events_then_stores_history() {
        let manager = manager();
        let channel = manager.allocate_channel(None).await;
        let provider = ScriptedProvider::new(vec![action("echo", serde_json::json!("hi")), final_answer("hi")]);
        let mut session = manager
            .start(channel.clone(), "say hi".into(), reasoning(provider))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = session.next_event().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(events[2].is_final());
        assert_eq!(session.handle().state(), crate::run::RunState::Finished);

        let history = manager.store().history(&channel).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "say hi");
        assert_eq!(history[1].content, "hi");

        drop(session);
        assert!(!manager.is_active(&channel));
        assert!(!manager.bus().is_open(&channel));
    }

    #[tokio::test]
    async fn second_run_on_busy_channel_is_refused() {
        let manager = manager();
        let channel = ChannelId::from("busy");
        let slow = ScriptedProvider::new(vec![final_answer("x")]).with_delay(Duration::from_secs(30));
        let _first = manager
            .start(channel.clone(), "q".into(), reasoning(slow))
            .await
            .unwrap();

        let err = manager
            .start(channel.clone(), "q2".into(), reasoning(ScriptedProvider::repeating("x")))
            .await
            .err()
            .unwrap();
        assert_eq!(err, SessionError::ChannelBusy(channel));
    }

    #[tokio::test]
    async fn allocate_reuses_known_channels_only() {
        let manager = manager();
        let known = ChannelId::from("known");
        manager.store().append(&known, vec![Message::user("earlier")]).await;

        assert_eq!(manager.allocate_channel(Some("known")).await, known);
        let fresh = manager.allocate_channel(Some("never-seen")).await;
        assert_ne!(fresh.as_str(), "never-seen");
        assert_ne!(manager.allocate_channel(Some("  ")).await.as_str(), "");
    }

    #[tokio::test]
    async fn follow_up_turn_sees_history() {
        let manager = manager();
        let channel = manager.allocate_channel(None).await;
        let first = manager
            .start(channel.clone(), "first".into(), reasoning(ScriptedProvider::new(vec![final_answer("one")])))
            .await
            .unwrap();
        drain(first).await;

        let provider = Arc::new(ScriptedProvider::new(vec![final_answer("two")]));
        let second = Arc::new(ReasoningLoop::new(
            provider.clone(),
            Arc::new(echo_registry()),
            Arc::new(AgentConfig::new("m").with_token_streaming(false)),
        ));
        let session = manager.start(channel.clone(), "second".into(), second).await.unwrap();
        drain(session).await;

        let request = provider.request(0).unwrap();
        let contents: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&"first"));
        assert!(contents.contains(&"one"));
        assert_eq!(manager.store().history(&channel).await.len(), 4);
    }

    async fn drain(mut session: StreamSession) {
        while session.next_event().await.is_some() {}
    }

    #[tokio::test]
    async fn cancel_delivers_a_failed_event_to_the_listening_stream() {
        let manager = manager();
        let channel = ChannelId::from("c");
        let slow = ScriptedProvider::new(vec![final_answer("late")]).with_delay(Duration::from_secs(30));
        let mut session = manager.start(channel.clone(), "q".into(), reasoning(slow)).await.unwrap();

        assert_eq!(manager.cancel(&channel), Some(CancelOutcome::Cancelled));
        assert_eq!(manager.cancel(&channel), Some(CancelOutcome::AlreadyCancelled));

        let mut events = Vec::new();
        while let Some(event) = session.next_event().await {
            events.push(event);
        }
        assert_eq!(events.len(), 1);
        assert!(events[0].is_final());
        assert_eq!(events[0].depth, 0);
        assert!(matches!(&events[0].event, StepEvent::Failed { reason } if reason == "run cancelled"));
        assert!(manager.store().history(&channel).await.is_empty());
    }

    #[tokio::test]
    async fn cancel_mid_run_keeps_earlier_events_and_ends_with_failed() {
        let manager = manager();
        let channel = ChannelId::from("mid");
        let provider = ScriptedProvider::new(vec![action("echo", serde_json::json!("one")), final_answer("late")])
            .with_delay(Duration::from_millis(50));
        let mut session = manager.start(channel.clone(), "q".into(), reasoning(provider)).await.unwrap();

        let started = session.next_event().await.unwrap();
        assert!(matches!(started.event, StepEvent::ToolCallStarted { .. }));
        manager.cancel(&channel);

        let mut rest = Vec::new();
        while let Some(event) = session.next_event().await {
            rest.push(event);
        }
        let last = rest.last().unwrap();
        assert!(matches!(&last.event, StepEvent::Failed { reason } if reason == "run cancelled"));
        assert_eq!(rest.iter().filter(|e| e.is_final()).count(), 1);
        assert!(rest.iter().all(|e| !matches!(e.event, StepEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn cancel_after_finish_is_a_no_op() {
        let manager = manager();
        let channel = ChannelId::from("done");
        let mut session = manager
            .start(channel.clone(), "q".into(), reasoning(ScriptedProvider::new(vec![final_answer("ok")])))
            .await
            .unwrap();
        let event = session.next_event().await.unwrap();
        assert!(matches!(event.event, StepEvent::Finished { .. }));

        assert_eq!(manager.cancel(&channel), Some(CancelOutcome::AlreadyFinished));
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_run() {
        let manager = manager();
        let channel = ChannelId::from("gone");
        let slow = ScriptedProvider::new(vec![final_answer("late")]).with_delay(Duration::from_secs(30));
        let session = manager.start(channel.clone(), "q".into(), reasoning(slow)).await.unwrap();
        let handle = session.handle().clone();

        let mut observer = manager.bus().subscribe(&channel).unwrap();

        drop(session);
        assert!(handle.token().is_cancelled());
        wait_until_idle(&manager, &channel).await;
        assert!(observer.recv().await.is_none());
        assert!(manager.store().history(&channel).await.is_empty());
    }

    #[tokio::test]
    async fn late_subscriber_gets_replay() {
        let manager = manager();
        let channel = ChannelId::from("fan");
        let mut session = manager
            .start(channel.clone(), "q".into(), reasoning(ScriptedProvider::new(vec![final_answer("ok")])))
            .await
            .unwrap();
        let first = session.next_event().await.unwrap();
        assert!(first.is_final());

        let mut late = manager.bus().subscribe(&channel).unwrap();
        assert_eq!(late.recv().await.unwrap().seq, first.seq);
    }
}
