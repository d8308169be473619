//! Integration tests for RetryingStorage over the in-memory backend.
//!
//! A flaky wrapper injects transient faults in front of a real backend so the
//! retry ceiling and error pass-through can be observed end to end.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use yarra_store::{
    LockOutcome, LockService, ObjectLock, ObjectMeta, ObjectStorage, ObjectStoreBackend,
    RetryPolicy, RetryingStorage, StoreError, StoreResult, WriteMode,
};

/// Fails the first `failures` calls with a transient error, then delegates.
struct Flaky {
    inner: ObjectStoreBackend,
    failures: u32,
    calls: AtomicU32,
}

impl Flaky {
    fn new(inner: ObjectStoreBackend, failures: u32) -> Self {
        Self {
            inner,
            failures,
            calls: AtomicU32::new(0),
        }
    }

    fn trip(&self) -> StoreResult<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(StoreError::Io {
                message: format!("503 backend unavailable (call {})", n),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStorage for Flaky {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> StoreResult<Vec<ObjectMeta>> {
        self.trip()?;
        self.inner.list(bucket, prefix).await
    }

    async fn download(&self, bucket: &str, path: &str) -> StoreResult<Bytes> {
        self.trip()?;
        self.inner.download(bucket, path).await
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        mode: WriteMode,
    ) -> StoreResult<()> {
        self.trip()?;
        self.inner.put(bucket, path, bytes, mode).await
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str, force: bool) -> StoreResult<usize> {
        self.trip()?;
        self.inner.delete_prefix(bucket, prefix, force).await
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> StoreResult<()> {
        self.trip()?;
        self.inner.delete_object(bucket, path).await
    }
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_timeouts(Duration::from_millis(1), Duration::from_millis(4))
}

async fn seeded() -> ObjectStoreBackend {
    let backend = ObjectStoreBackend::memory(["sim", "lock"]);
    for path in ["studyA/config.json", "studyA/0/md5.json"] {
        backend
            .put("sim", path, Bytes::from_static(b"{}"), WriteMode::Overwrite)
            .await
            .unwrap();
    }
    backend
}

#[tokio::test]
async fn test_list_recovers_below_ceiling() {
    let flaky = Arc::new(Flaky::new(seeded().await, 3));
    let storage = RetryingStorage::new(flaky.clone(), policy(4));

    let listed = storage.list("sim", None).await.expect("list should recover");
    let paths: Vec<&str> = listed.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(paths, vec!["studyA/0/md5.json", "studyA/config.json"]);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_list_fails_at_ceiling_with_underlying_error() {
    let flaky = Arc::new(Flaky::new(seeded().await, 4));
    let storage = RetryingStorage::new(flaky.clone(), policy(4));

    match storage.list("sim", None).await {
        Err(StoreError::Io { message }) => {
            assert_eq!(message, "503 backend unavailable (call 3)")
        }
        other => panic!("expected transient error to surface, got {:?}", other),
    }
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_empty_bucket_rejected_before_any_call() {
    let flaky = Arc::new(Flaky::new(seeded().await, 0));
    let storage = RetryingStorage::new(flaky.clone(), policy(4));

    let err = storage.list("", None).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidBucket { .. }));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_download_not_found_is_not_retried() {
    let flaky = Arc::new(Flaky::new(seeded().await, 0));
    let storage = RetryingStorage::new(flaky.clone(), policy(4));

    let err = storage.download("sim", "nope.json").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_lock_over_retrying_storage() {
    let backend = seeded().await;
    let flaky = Arc::new(Flaky::new(backend.clone(), 2));
    let storage = RetryingStorage::new(flaky, policy(3));
    let locks = ObjectLock::new(storage, Duration::from_secs(3600)).with_owner("worker-1");
    let other = ObjectLock::new(backend, Duration::from_secs(3600)).with_owner("worker-2");

    let outcome = locks.acquire("lock", "studyA/config.json").await.unwrap();
    assert!(matches!(outcome, LockOutcome::Acquired(_)));
    match other.acquire("lock", "studyA/config.json").await.unwrap() {
        LockOutcome::AlreadyHeld { owner, .. } => assert_eq!(owner.as_deref(), Some("worker-1")),
        unexpected => panic!("expected AlreadyHeld, got {:?}", unexpected),
    }
}

/// Lets the first create-only put land, then reports a transient failure
/// as if the response had been lost.
struct LostResponse {
    inner: ObjectStoreBackend,
    tripped: AtomicU32,
}

#[async_trait]
impl ObjectStorage for LostResponse {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> StoreResult<Vec<ObjectMeta>> {
        self.inner.list(bucket, prefix).await
    }

    async fn download(&self, bucket: &str, path: &str) -> StoreResult<Bytes> {
        self.inner.download(bucket, path).await
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        mode: WriteMode,
    ) -> StoreResult<()> {
        let create = mode == WriteMode::Create;
        self.inner.put(bucket, path, bytes, mode).await?;
        if create && self.tripped.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StoreError::Io {
                message: "connection reset after upload".into(),
            });
        }
        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str, force: bool) -> StoreResult<usize> {
        self.inner.delete_prefix(bucket, prefix, force).await
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> StoreResult<()> {
        self.inner.delete_object(bucket, path).await
    }
}

#[tokio::test]
async fn test_lock_create_retried_after_lost_response_is_still_ours() {
    let backend = seeded().await;
    let storage = RetryingStorage::new(
        LostResponse {
            inner: backend.clone(),
            tripped: AtomicU32::new(0),
        },
        policy(3),
    );
    let locks = ObjectLock::new(storage, Duration::from_secs(3600)).with_owner("worker-1");

    match locks.acquire("lock", "studyA/config.json").await.unwrap() {
        LockOutcome::Acquired(lease) => assert_eq!(lease.owner, "worker-1"),
        unexpected => panic!("own marker should count as acquired, got {:?}", unexpected),
    }

    let other = ObjectLock::new(backend, Duration::from_secs(3600)).with_owner("worker-2");
    assert!(matches!(
        other.acquire("lock", "studyA/config.json").await.unwrap(),
        LockOutcome::AlreadyHeld { .. }
    ));
}
