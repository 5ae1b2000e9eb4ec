//! Bounded reconnect loop around [`SubscriptionSession`](crate::session::SubscriptionSession)s.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;
use crate::session::SessionEnd;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the retry following failure number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(31);
                base.checked_mul(1u32 << shift).unwrap_or(max).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed sessions tolerated before giving up.
    pub max_retries: u32,
    pub backoff: Backoff,
    /// A session that stayed live at least this long resets the failure
    /// count. `None` never resets.
    pub reset_after: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::Fixed(DEFAULT_RETRY_DELAY),
            reset_after: Some(DEFAULT_RESET_AFTER),
        }
    }
}

pub struct ReconnectSupervisor {
    name: String,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ReconnectSupervisor {
    pub fn new(name: impl Into<String>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            name: name.into(),
            policy,
            cancel,
        }
    }

    /// Run sessions from `next_session` until one closes cleanly, the token is
    /// cancelled, or the retry budget is spent.
    pub async fn run<F, Fut>(&self, mut next_session: F) -> Result<(), SupervisorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SessionEnd>,
    {
        let mut retry_count: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let (error, live_for) = match next_session().await {
                SessionEnd::Closed => {
                    tracing::info!(bot = %self.name, "session closed");
                    return Ok(());
                }
                SessionEnd::Failed { error, live_for } => (error, live_for),
            };
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            if let Some(reset_after) = self.policy.reset_after
                && let Some(live_for) = live_for
                && live_for >= reset_after
            {
                retry_count = 0;
            }
            retry_count += 1;

            if retry_count >= self.policy.max_retries {
                tracing::error!(
                    bot = %self.name,
                    attempts = retry_count,
                    "max retries reached, giving up: {error}"
                );
                return Err(SupervisorError::RetriesExhausted {
                    attempts: retry_count,
                    last: error,
                });
            }

            let delay = self.policy.backoff.delay(retry_count);
            tracing::warn!(
                bot = %self.name,
                attempt = retry_count,
                max = self.policy.max_retries,
                "{error}; retrying in {delay:?}"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
