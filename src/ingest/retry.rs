//! Fixed-delay retries.
//!
//! Used by the stream handshake, which keeps probing an unreachable stream
//! until it answers or the attempt budget runs out.

use anyhow::{anyhow, Result};
use std::time::Duration;

/// Default pause between stream handshake attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fixed-delay retry schedule.
///
/// `max_attempts = None` retries forever. Callers that cannot tolerate an
/// unreachable stream must set a bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
        }
    }

    /// Whether another attempt follows a failed `attempt` (1-based).
    pub fn retries_after(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Run `op` until it succeeds or the attempt budget is spent.
///
/// `op` receives the 1-based attempt number. `on_failure` is called after each
/// failed attempt, before sleeping. The error from the last attempt is
/// returned when the budget runs out.
pub fn retry<T>(
    policy: RetryPolicy,
    mut op: impl FnMut(u32) -> Result<T>,
    mut on_failure: impl FnMut(u32, &anyhow::Error),
) -> Result<T> {
    if policy.max_attempts == Some(0) {
        return Err(anyhow!("retry policy allows zero attempts"));
    }
    let mut attempt: u32 = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                on_failure(attempt, &err);
                if !policy.retries_after(attempt) {
                    return Err(err.context(format!("gave up after {} attempts", attempt)));
                }
            }
        }
        std::thread::sleep(policy.delay);
        attempt = attempt.saturating_add(1);
    }
}
