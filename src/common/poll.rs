// src/common/poll.rs

use std::future::Future;
use std::time::Duration;

/// Fixed-interval polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Runs `probe` until it yields `Some`, sleeping `interval` between checks.
///
/// Returns `None` once `attempts` probes have all come back empty. There is
/// no backoff: every gap is the same length.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=policy.attempts {
        if let Some(value) = probe().await {
            return Some(value);
        }

        tracing::debug!(attempt, max_attempts = policy.attempts, "poll: not ready yet");

        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    None
}
