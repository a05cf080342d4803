use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: String,
}

impl Display for RetryExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed after {} attempts: {}", self.attempts, self.last_error)
    }
}

/// Runs `operation` until it yields a value `is_acceptable` approves, or the
/// policy runs out of attempts. A fixed `backoff` separates attempts; there is
/// no delay after the last one.
pub async fn retry<T, E, F, Fut, P>(
    policy: RetryPolicy,
    label: &str,
    mut operation: F,
    is_acceptable: P,
) -> Result<T, RetryExhausted>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        match operation(attempt).await {
            Ok(value) if is_acceptable(&value) => return Ok(value),
            Ok(_) => last_error = "malformed response".to_string(),
            Err(e) => last_error = e.to_string(),
        }

        warn!(
            label,
            attempt,
            max_attempts = policy.max_attempts,
            error = %last_error,
            "Attempt failed"
        );

        if attempt < policy.max_attempts && !policy.backoff.is_zero() {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    Err(RetryExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}
