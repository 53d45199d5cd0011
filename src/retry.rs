//! Retry policies with staged backoff schedules.
//!
//! A `RetryPolicy` is a list of stages, each stage being "N attempts spaced by
//! a fixed delay". The schedule of waits is the stages laid end to end, so
//! `[(3, 5s), (2, 30s), (1, 60s)]` means up to six retries after the first
//! failure, waiting 5s, 5s, 5s, 30s, 30s and finally 60s.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// One segment of a retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStage {
    /// Number of retries in this stage
    pub attempts: u32,
    /// Delay before each of those retries
    #[serde(with = "crate::util::secs_f64")]
    pub delay: Duration,
}

impl RetryStage {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Bounded retry policy with a non-uniform backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub stages: Vec<RetryStage>,
}

impl RetryPolicy {
    pub fn new(stages: Vec<RetryStage>) -> Self {
        Self { stages }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self { stages: Vec::new() }
    }

    /// `attempts` retries, all spaced by `delay`.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self::new(vec![RetryStage::new(attempts, delay)])
    }

    /// Schedule used for establishing SSH connections.
    pub fn ssh_default() -> Self {
        Self::new(vec![
            RetryStage::new(3, Duration::from_secs(5)),
            RetryStage::new(2, Duration::from_secs(30)),
            RetryStage::new(1, Duration::from_secs(60)),
        ])
    }

    /// Total number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.stages.iter().map(|s| s.attempts).sum()
    }

    /// Delays in the order they are applied.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        self.stages
            .iter()
            .flat_map(|s| std::iter::repeat(s.delay).take(s.attempts as usize))
    }

    /// Delay before retry number `retry` (0-indexed), or `None` once the
    /// schedule is exhausted.
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        self.delays().nth(retry as usize)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ssh_default()
    }
}

/// Run `op` until it succeeds, the error is not retryable, or the policy's
/// schedule runs out. The last error is returned on exhaustion.
pub async fn retry_async<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut delays = policy.delays();
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if is_retryable(&e) => match delays.next() {
                Some(delay) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {}s",
                        label,
                        attempt,
                        policy.max_retries() + 1,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    warn!("{} failed after {} attempts: {}", label, attempt, e);
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_schedule_expands_stages_in_order() {
        let policy = RetryPolicy::ssh_default();
        let delays: Vec<u64> = policy.delays().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![5, 5, 5, 30, 30, 60]);
        assert_eq!(policy.max_retries(), 6);
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_for(6), None);
    }

    #[test]
    fn test_none_policy() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_retries(), 0);
        assert!(policy.delays().next().is_none());
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: RetryPolicy = toml::from_str(
            r#"
            stages = [
                { attempts = 2, delay = 1.5 },
                { attempts = 1, delay = 10 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for(0), Some(Duration::from_millis(1500)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed(5, Duration::from_secs(2));
        let start = tokio::time::Instant::now();

        let c = calls.clone();
        let result: Result<u32, String> = retry_async(
            &policy,
            "flaky",
            || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("failure {}", n))
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(vec![
            RetryStage::new(1, Duration::from_secs(1)),
            RetryStage::new(1, Duration::from_secs(3)),
        ]);
        let start = tokio::time::Instant::now();

        let c = calls.clone();
        let result: Result<(), String> = retry_async(
            &policy,
            "always-down",
            || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {}", n))
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err(), "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed(3, Duration::from_secs(60));

        let c = calls.clone();
        let result: Result<(), String> = retry_async(
            &policy,
            "fatal",
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("permission denied".to_string())
                }
            },
            |e| !e.contains("permission"),
        )
        .await;

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
