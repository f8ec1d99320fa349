//! Bounded retry with an explicit backoff policy.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay between attempts.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every failed attempt
    Fixed {
        /// Delay
        delay: Duration,
    },
    /// Uniformly random delay in `[min, max]`
    Jittered {
        /// Shortest delay
        min: Duration,
        /// Longest delay
        max: Duration,
    },
    /// Doubling delay, capped
    Exponential {
        /// Delay after the first failure
        initial: Duration,
        /// Upper bound
        max: Duration,
    },
}

/// How many times to try an operation and how long to wait in between.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: Backoff,
}

/// The last error of an exhausted retry loop.
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Attempts made
    pub attempts: u32,
    /// Error from the final attempt
    pub last_error: E,
}

impl RetryPolicy {
    /// Policy for writing in-progress markers: 10 attempts, one second apart.
    #[must_use]
    pub const fn marker_write() -> Self {
        Self {
            max_attempts: 10,
            backoff: Backoff::Fixed {
                delay: Duration::from_secs(1),
            },
        }
    }

    /// Policy for reclaiming a temp table: 1000 attempts, 1-100ms apart.
    #[must_use]
    pub const fn temp_table_cleanup() -> Self {
        Self {
            max_attempts: 1000,
            backoff: Backoff::Jittered {
                min: Duration::from_millis(1),
                max: Duration::from_millis(100),
            },
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed { delay } => *delay,
            Backoff::Jittered { min, max } => {
                if max <= min {
                    return *min;
                }
                let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
                Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
            }
            Backoff::Exponential { initial, max } => {
                let shift = attempt.saturating_sub(1).min(31);
                initial.saturating_mul(1 << shift).min(*max)
            }
        }
    }

    /// Runs `op` until it succeeds or the attempt bound is reached.
    ///
    /// `op` receives the 1-based attempt number. There is no delay after the
    /// final attempt.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(last_error) if attempt >= max_attempts => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error,
                    });
                }
                Err(_) => {
                    tokio::time::sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::marker_write();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: Result<(), _> = policy
            .run(|_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("replication quorum lost")
                }
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 10);
        assert_eq!(exhausted.last_error, "replication quorum lost");
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        // Nine sleeps between ten attempts
        assert_eq!(started.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_success() {
        let policy = RetryPolicy::marker_write();

        let result = policy
            .run(|attempt| async move {
                if attempt < 3 {
                    Err("busy")
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        let policy = RetryPolicy::temp_table_cleanup();
        for attempt in 1..200 {
            let delay = policy.delay_after(attempt);
            assert!(delay >= Duration::from_millis(1));
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 8,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(50),
            },
        };

        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(2), Duration::from_millis(20));
        assert_eq!(policy.delay_after(3), Duration::from_millis(40));
        assert_eq!(policy.delay_after(4), Duration::from_millis(50));
        assert_eq!(policy.delay_after(40), Duration::from_millis(50));
    }
}
