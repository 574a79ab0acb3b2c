//! Retry policy and a generic async retry loop
//!
//! The loop knows nothing about providers: it runs an attempt under a timeout,
//! sleeps `base_delay * 2^attempt` between failures and reports how many attempts
//! it took. The executor layers provider semantics on top.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay
    pub max_delay: Duration,
    /// Fraction of each delay added as random jitter (0.0 disables)
    pub jitter: f64,
    /// Hard timeout for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    ///
    /// With the default 1 s base: 2 s after attempt 1, 4 s after attempt 2.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            delay + delay.mul_f64(extra)
        } else {
            delay
        }
    }

    /// Sum of the delays a fully failing run sleeps through (jitter excluded).
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| {
                self.base_delay
                    .saturating_mul(2u32.saturating_pow(attempt))
                    .min(self.max_delay)
            })
            .sum()
    }
}

/// Why one attempt failed.
#[derive(Debug)]
pub enum AttemptError<E> {
    /// The attempt ran past `attempt_timeout`
    TimedOut(Duration),
    Failed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::TimedOut(limit) => write!(f, "attempt exceeded {}s", limit.as_secs()),
            AttemptError::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    /// Error from the final attempt
    pub last: AttemptError<E>,
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// `op` receives the 1-based attempt number. Returns the value together with the
/// number of attempts it took.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> std::result::Result<(T, u32), Exhausted<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, op(attempt)).await {
            Ok(Ok(value)) => return Ok((value, attempt)),
            Ok(Err(e)) => AttemptError::Failed(e),
            Err(_) => AttemptError::TimedOut(policy.attempt_timeout),
        };

        if attempt >= max_attempts {
            tracing::warn!(
                op = label,
                attempts = attempt,
                error = %outcome,
                "Giving up after final attempt"
            );
            return Err(Exhausted {
                attempts: attempt,
                last: outcome,
            });
        }

        let delay = policy.delay_for(attempt);
        tracing::debug!(
            op = label,
            attempt,
            max_attempts,
            error = %outcome,
            "Attempt failed, retrying in {:?}",
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
