//! Retry policies for network calls.
//!
//! The LLM client and the HTTP cache client both retry through a
//! [`RetryPolicy`] instead of a hard-coded loop. The default is a fixed
//! linear policy (3 attempts, 2 seconds apart); exponential backoff with
//! jitter is available for endpoints that rate-limit.
//!
//! The delay between retries for [`RetryPolicy::Exponential`] follows:
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Up to `max_attempts` tries with the same delay between each.
    Fixed {
        max_attempts: usize,
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// One try plus up to `max_retries` retries with doubling, jittered delays.
    Exponential {
        max_retries: usize,
        #[serde(with = "millis")]
        base_delay: Duration,
        #[serde(with = "millis")]
        max_delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        RetryPolicy::Fixed {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> usize {
        match self {
            RetryPolicy::Fixed { max_attempts, .. } => (*max_attempts).max(1),
            RetryPolicy::Exponential { max_retries, .. } => max_retries + 1,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based), or
    /// `None` when the policy is exhausted.
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        if attempt >= self.max_attempts() {
            return None;
        }
        match self {
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::Exponential {
                base_delay,
                max_delay,
                ..
            } => {
                let shift = (attempt - 1).min(31) as u32;
                let delay = base_delay.saturating_mul(1 << shift).min(*max_delay);
                let jitter_ms: u64 = rng().random_range(0..=250);
                Some(delay + Duration::from_millis(jitter_ms))
            }
        }
    }

    /// Run `op` until it succeeds, `retryable` rejects its error, or the
    /// policy is exhausted. Returns the last error in the latter cases.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    let delay = if retryable(&e) {
                        self.delay_after(attempt)
                    } else {
                        None
                    };
                    let Some(delay) = delay else {
                        error!(
                            label,
                            attempt,
                            max = self.max_attempts(),
                            elapsed_ms_attempt = attempt_dt.as_millis(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "giving up"
                        );
                        return Err(e);
                    };

                    warn!(
                        label,
                        attempt,
                        max = self.max_attempts(),
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "attempt failed; retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
