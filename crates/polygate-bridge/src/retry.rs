//! Retry policies
//!
//! Two shapes are used:
//! - [`FixedBackoff`] restarts a whole batch-insert transaction after a
//!   transient write conflict (3 attempts, 2s apart by default)
//! - [`DecorrelatedJitter`] spaces retries of idempotent calls after
//!   network-class failures
//!
//! Both are stateless and can be shared across calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BridgeError;

/// Fixed delay between a bounded number of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedBackoff {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Sleep between attempts
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl FixedBackoff {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Delay before `attempt` (1-based) or `None` once attempts are exhausted
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        (attempt <= self.max_attempts).then_some(if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay
        })
    }
}

/// Exponential backoff with decorrelated jitter:
/// `next = min(max, random(base, previous * 3))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecorrelatedJitter {
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for DecorrelatedJitter {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_attempts: 4,
        }
    }
}

impl DecorrelatedJitter {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Next sleep given the previous one
    pub fn next_delay<R: Rng + ?Sized>(&self, previous: Duration, rng: &mut R) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let upper = (previous.as_millis() as u64).saturating_mul(3).max(base + 1);
        let picked = rng.gen_range(base..upper);
        Duration::from_millis(picked).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-network error, or runs
    /// out of attempts. Only use for idempotent work.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, BridgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let mut previous = self.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_network() && attempt < self.max_attempts => {
                    let delay = self.next_delay(previous, &mut rand::thread_rng());
                    warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Network error, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    previous = delay;
                    attempt += 1;
                }
                Err(e) => return Err(e),
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
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fixed_backoff_schedule() {
        let policy = FixedBackoff::default();
        assert_eq!(policy.delay_before(1), Some(Duration::ZERO));
        assert_eq!(policy.delay_before(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_before(3), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_before(4), None);
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = DecorrelatedJitter::new(Duration::from_millis(10), Duration::from_millis(200), 5);
        let mut rng = StdRng::seed_from_u64(7);
        let mut previous = policy.base_delay;
        for _ in 0..100 {
            let next = policy.next_delay(previous, &mut rng);
            assert!(next >= Duration::from_millis(10));
            assert!(next <= Duration::from_millis(200));
            previous = next;
        }
    }

    #[tokio::test]
    async fn test_run_retries_network_errors() {
        let policy = DecorrelatedJitter::new(Duration::from_millis(1), Duration::from_millis(2), 3);
        let calls = AtomicU32::new(0);
        let result = policy
            .run("probe", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(polygate_rdbc::Error::connection("connection reset").into())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_other_errors() {
        let policy = DecorrelatedJitter::new(Duration::from_millis(1), Duration::from_millis(2), 5);
        let calls = AtomicU32::new(0);
        let err = policy
            .run("probe", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(polygate_rdbc::Error::invalid_request("bad").into())
            })
            .await
            .unwrap_err();
        assert!(!err.is_network());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_attempts() {
        let policy = DecorrelatedJitter::new(Duration::from_millis(1), Duration::from_millis(2), 2);
        let calls = AtomicU32::new(0);
        let err = policy
            .run("probe", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(polygate_rdbc::Error::timeout("timed out").into())
            })
            .await
            .unwrap_err();
        assert!(err.is_network());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
