//! Poll-with-timeout.
//!
//! Hardware that reports completion only through a readable value (a frame
//! buffer filling up, a scan rotation returning to its baseline) is watched by
//! re-reading the value at a fixed interval. [`poll_until`] bounds that wait
//! and reports how it ended instead of spinning forever.

use crate::progress::ProgressFuture;
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::trace;

/// How a poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition became true
    Satisfied,
    /// The timeout elapsed first
    TimedOut,
    /// The operation was cancelled between polls
    Cancelled,
}

/// Interval and optional timeout for [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two reads
    pub interval: Duration,
    /// Give up after this long; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    /// Poll every `interval` with no timeout.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Evaluate `condition` until it holds, the timeout elapses, or `cancel` is
/// cancelled.
///
/// The condition is checked first, then cancellation, then the deadline,
/// then the task sleeps for one interval (shortened so the deadline is not
/// overshot). Errors from the condition abort the poll.
pub async fn poll_until<F, Fut>(
    policy: PollPolicy,
    cancel: Option<&ProgressFuture>,
    mut condition: F,
) -> Result<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = policy.timeout.map(|t| Instant::now() + t);
    let mut attempts: u64 = 0;

    loop {
        attempts += 1;
        if condition().await? {
            trace!(attempts, "poll satisfied");
            return Ok(PollOutcome::Satisfied);
        }
        if cancel.is_some_and(ProgressFuture::is_cancelled) {
            return Ok(PollOutcome::Cancelled);
        }

        let mut pause = policy.interval;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                trace!(attempts, "poll timed out");
                return Ok(PollOutcome::TimedOut);
            }
            pause = pause.min(deadline - now);
        }
        sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn satisfied_after_a_few_polls() {
        let reads = Arc::new(AtomicU32::new(0));
        let counter = reads.clone();
        let start = Instant::now();

        let outcome = poll_until(PollPolicy::every(Duration::from_secs(1)), None, || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 3) }
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Satisfied);
        assert_eq!(reads.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_overshooting() {
        let start = Instant::now();
        let policy = PollPolicy::every(Duration::from_secs(4))
            .with_timeout(Some(Duration::from_secs(10)));

        let outcome = poll_until(policy, None, || async { Ok(false) })
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_cancelled() {
        let progress = ProgressFuture::new();
        progress.set_running_or_notify_cancel();
        let canceller = progress.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(9)).await;
            canceller.cancel();
        });

        let outcome = poll_until(
            PollPolicy::every(Duration::from_secs(4)),
            Some(&progress),
            || async { Ok(false) },
        )
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn condition_errors_propagate() {
        let result = poll_until(PollPolicy::every(Duration::from_secs(1)), None, || async {
            Err::<bool, _>(anyhow!("connection lost"))
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("connection lost"));
    }
}
