//! Progress futures for long-running operations.
//!
//! A [`ProgressFuture`] is created per invocation of a long operation (a
//! milling run, an image acquisition pass). The worker publishes an expected
//! end time and polls for cancellation between steps; the UI subscribes to
//! both and may request cancellation at any time.
//!
//! ```text
//! Pending ──set_running_or_notify_cancel──▶ Running ──set_result──▶ Finished
//!    │                                         │
//!    └──────────────── cancel ─────────────────┴──────────────────▶ Cancelled
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Lifecycle state of a [`ProgressFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, work not started
    Pending,
    /// Work in progress
    Running,
    /// Cancellation requested
    Cancelled,
    /// Work completed
    Finished,
}

impl TaskState {
    /// Whether the state is final.
    pub fn is_done(self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Finished)
    }
}

/// Time window published by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEstimate {
    /// When the operation started
    pub started: Instant,
    /// When the operation is expected to end
    pub expected_end: Instant,
}

impl ProgressEstimate {
    /// Time left until the expected end (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.expected_end.saturating_duration_since(Instant::now())
    }
}

struct Inner {
    created: Instant,
    state: watch::Sender<TaskState>,
    estimate: watch::Sender<Option<ProgressEstimate>>,
}

/// Handle on one long-running operation. Clones share the same operation.
#[derive(Clone)]
pub struct ProgressFuture {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProgressFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressFuture")
            .field("state", &self.state())
            .field("estimate", &*self.inner.estimate.borrow())
            .finish()
    }
}

impl Default for ProgressFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressFuture {
    /// Create a pending operation.
    pub fn new() -> Self {
        let (state, _) = watch::channel(TaskState::Pending);
        let (estimate, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                created: Instant::now(),
                state,
                estimate,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        *self.inner.state.borrow()
    }

    /// Mark the work as started.
    ///
    /// Returns `false` if the operation was cancelled before it could start.
    pub fn set_running_or_notify_cancel(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == TaskState::Pending {
                *state = TaskState::Running;
                true
            } else {
                false
            }
        });
        self.state() == TaskState::Running
    }

    /// Request cancellation.
    ///
    /// Returns `false` if the operation had already finished. Cancellation is
    /// cooperative: the worker only notices it at its next check.
    pub fn cancel(&self) -> bool {
        self.inner.state.send_if_modified(|state| match state {
            TaskState::Pending | TaskState::Running => {
                *state = TaskState::Cancelled;
                true
            }
            TaskState::Cancelled | TaskState::Finished => false,
        });
        self.state() == TaskState::Cancelled
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Whether the operation reached a final state.
    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    /// Mark the work as completed. Ignored once cancelled.
    pub fn set_result(&self) {
        self.inner.state.send_if_modified(|state| match state {
            TaskState::Pending | TaskState::Running => {
                *state = TaskState::Finished;
                true
            }
            TaskState::Cancelled | TaskState::Finished => false,
        });
    }

    /// Publish a new expected end time.
    pub fn set_progress(&self, expected_end: Instant) {
        self.inner.estimate.send_replace(Some(ProgressEstimate {
            started: self.inner.created,
            expected_end,
        }));
    }

    /// Latest published estimate.
    pub fn estimate(&self) -> Option<ProgressEstimate> {
        *self.inner.estimate.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<TaskState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to estimate updates.
    pub fn subscribe_estimate(&self) -> watch::Receiver<Option<ProgressEstimate>> {
        self.inner.estimate.subscribe()
    }

    /// Wait until the operation is finished or cancelled.
    pub async fn wait_done(&self) -> TaskState {
        let mut rx = self.subscribe_state();
        let state = match rx.wait_for(|s| s.is_done()).await {
            Ok(state) => *state,
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.state(),
        };
        state
    }
}
