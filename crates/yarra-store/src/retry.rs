//! Retry with exponential backoff and jitter for transient storage faults.
//!
//! Only errors classified by [`StoreError::is_transient`] are retried.
//! Validation errors and "not found" surface on the first attempt.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ObjectMeta, ObjectStorage, StoreError, StoreResult, WriteMode};

/// Backoff schedule shared by every storage call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Exponential growth factor between retries.
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Multiply each delay by a random factor in `[1, 2)`.
    #[serde(default = "default_randomize")]
    pub randomize: bool,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_factor() -> f64 {
    2.0
}

fn default_min_timeout_ms() -> u64 {
    1_000
}

fn default_max_timeout_ms() -> u64 {
    10_000
}

fn default_randomize() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            factor: default_factor(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            randomize: default_randomize(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set minimum and maximum delay.
    pub fn with_timeouts(mut self, min: Duration, max: Duration) -> Self {
        self.min_timeout_ms = min.as_millis() as u64;
        self.max_timeout_ms = max.as_millis() as u64;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut millis = self.min_timeout_ms as f64 * self.factor.max(1.0).powi(exponent);
        if self.randomize {
            millis *= rand::thread_rng().gen_range(1.0_f64..2.0_f64);
        }
        let capped = millis.min(self.max_timeout_ms as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }

    /// Run `call` until it succeeds, fails permanently, or the attempt
    /// ceiling is reached. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        operation,
                        error = %e,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying storage call"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wraps any [`ObjectStorage`] and retries its transient failures.
#[derive(Debug, Clone)]
pub struct RetryingStorage<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingStorage<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ObjectStorage> ObjectStorage for RetryingStorage<S> {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> StoreResult<Vec<ObjectMeta>> {
        crate::validate_bucket(bucket)?;
        self.policy
            .run("list", || self.inner.list(bucket, prefix))
            .await
    }

    async fn download(&self, bucket: &str, path: &str) -> StoreResult<Bytes> {
        self.policy
            .run("download", || self.inner.download(bucket, path))
            .await
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        mode: WriteMode,
    ) -> StoreResult<()> {
        self.policy
            .run("put", || self.inner.put(bucket, path, bytes.clone(), mode.clone()))
            .await
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str, force: bool) -> StoreResult<usize> {
        if prefix.is_empty() || prefix == "/" {
            return Err(StoreError::RefusedPrefix {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            });
        }
        self.policy
            .run("delete_prefix", || {
                self.inner.delete_prefix(bucket, prefix, force)
            })
            .await
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> StoreResult<()> {
        self.policy
            .run("delete_object", || self.inner.delete_object(bucket, path))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::default().with_timeouts(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            randomize: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4_000));
        assert_eq!(policy.backoff(10), Duration::from_millis(10_000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.backoff(1);
            assert!(d >= Duration::from_millis(1_000));
            assert!(d <= Duration::from_millis(2_000));
            assert!(policy.backoff(8) <= Duration::from_millis(10_000));
        }
    }

    #[tokio::test]
    async fn succeeds_below_ceiling() {
        let policy = fast().with_max_attempts(4);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy
            .run("flaky", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(StoreError::Io {
                        message: format!("reset {}", n),
                    })
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn surfaces_last_error_at_ceiling() {
        let policy = fast().with_max_attempts(3);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: StoreResult<()> = policy
            .run("down", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Io {
                    message: format!("attempt {}", n),
                })
            })
            .await;
        match result {
            Err(StoreError::Io { message }) => assert_eq!(message, "attempt 2"),
            other => panic!("expected Io error, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = fast();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: StoreResult<()> = policy
            .run("missing", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::NotFound {
                    bucket: "sim".into(),
                    path: "x".into(),
                })
            })
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
