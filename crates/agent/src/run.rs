//! Run lifecycle and the handle used to cancel a live run.
//!
//! A top-level run ends in exactly one of two ways: it finishes (publishes
//! its terminal event) or it is cancelled. [`RunLifecycle`] settles that
//! race with a single compare-and-swap, so a run that has already published
//! `Finished` can never also be reported as cancelled, and a cancelled run
//! never publishes `Finished`.

use matagent_core::channel::ChannelId;
use matagent_core::error::RunError;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How a reasoning run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished { answer: String, steps: u32 },
    Failed(RunError),
    /// Stopped by its cancellation token; nothing terminal was published
    Cancelled,
}

impl RunOutcome {
    pub fn answer(&self) -> Option<&str> {
        match self {
            RunOutcome::Finished { answer, .. } => Some(answer),
            _ => None,
        }
    }
}

/// Result of [`RunHandle::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyFinished,
    AlreadyCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Finished,
    Cancelled,
}

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug)]
pub struct RunLifecycle {
    state: AtomicU8,
}

impl RunLifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
        }
    }

    /// Claim the right to publish the terminal event.
    pub fn try_finish(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn try_cancel(&self) -> CancelOutcome {
        match self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => CancelOutcome::Cancelled,
            Err(FINISHED) => CancelOutcome::AlreadyFinished,
            Err(_) => CancelOutcome::AlreadyCancelled,
        }
    }

    pub fn state(&self) -> RunState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => RunState::Running,
            FINISHED => RunState::Finished,
            _ => RunState::Cancelled,
        }
    }
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// The one live run of a channel.
pub struct RunHandle {
    pub run_id: String,
    pub channel: ChannelId,
    token: CancellationToken,
    lifecycle: std::sync::Arc<RunLifecycle>,
    task: Mutex<Option<JoinHandle<RunOutcome>>>,
    abort: Mutex<Option<AbortHandle>>,
}

impl RunHandle {
    pub fn new(channel: ChannelId, token: CancellationToken, lifecycle: std::sync::Arc<RunLifecycle>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            channel,
            token,
            lifecycle,
            task: Mutex::new(None),
            abort: Mutex::new(None),
        }
    }

    /// Attach the spawned task driving this run.
    pub fn attach(&self, task: JoinHandle<RunOutcome>) {
        *lock(&self.abort) = Some(task.abort_handle());
        *lock(&self.task) = Some(task);
    }

    /// Request cancellation. Idempotent, never panics, and a no-op once
    /// the run has finished.
    pub fn cancel(&self) -> CancelOutcome {
        self.cancel_with(|| {})
    }

    /// Like [`cancel`](Self::cancel), but `announce` runs after the
    /// cancellation is claimed and before the token fires. Listeners see
    /// whatever it publishes ahead of the stream ending.
    pub fn cancel_with(&self, announce: impl FnOnce()) -> CancelOutcome {
        let outcome = self.lifecycle.try_cancel();
        match outcome {
            CancelOutcome::Cancelled => {
                announce();
                self.token.cancel();
                info!(channel = %self.channel, run_id = %self.run_id, "Run cancelled");
            }
            other => debug!(channel = %self.channel, ?other, "Cancel ignored"),
        }
        outcome
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the driving task has exited (or was never attached).
    pub fn is_done(&self) -> bool {
        lock(&self.abort).as_ref().is_none_or(|a| a.is_finished())
    }

    /// Forcefully stop the driving task.
    pub fn abort(&self) {
        if let Some(abort) = lock(&self.abort).as_ref()
            && !abort.is_finished()
        {
            info!(channel = %self.channel, run_id = %self.run_id, "Aborting run that ignored cancellation");
            abort.abort();
        }
    }

    /// Wait for the run to end. Only the first caller receives the outcome.
    pub async fn join(&self) -> Option<RunOutcome> {
        let task = lock(&self.task).take()?;
        task.await.ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
