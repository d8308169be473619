//! TTL-bounded leases stored as marker objects.
//!
//! A lease is a small JSON object at `{lock_bucket}/{key}`. Acquisition is a
//! create-only write, so two processes racing for the same key cannot both
//! win. Acquisition never waits: a live marker means another process owns
//! the key for now. A crashed holder's marker expires after the TTL and is
//! replaced by the next acquirer, conditional on the marker version it
//! inspected, so two acquirers cannot both take over the same stale marker.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ObjectStorage, StoreError, StoreResult, WriteMode};

/// Default lease lifetime.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60 * 60);

/// A held lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub bucket: String,
    pub key: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a non-blocking acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired(LockLease),
    AlreadyHeld {
        owner: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
}

/// TTL-bounded mutual exclusion keyed by `(bucket, key)`.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Try once to take the lease. Never waits for a holder to release.
    async fn acquire(&self, bucket: &str, key: &str) -> StoreResult<LockOutcome>;

    /// Drop a lease early. Missing markers are fine.
    async fn release(&self, lease: &LockLease) -> StoreResult<()>;

    /// Lease lifetime.
    fn ttl(&self) -> Duration;
}

/// Marker content written at the lock key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockMarker {
    owner: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// [`LockService`] on top of any [`ObjectStorage`].
#[derive(Debug, Clone)]
pub struct ObjectLock<S> {
    storage: S,
    ttl: Duration,
    owner: String,
}

impl<S: ObjectStorage> ObjectLock<S> {
    /// New lock service with a random owner id.
    pub fn new(storage: S, ttl: Duration) -> Self {
        Self {
            storage,
            ttl,
            owner: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Override the owner id written into markers.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn ttl_delta(&self) -> StoreResult<chrono::Duration> {
        chrono::Duration::from_std(self.ttl)
            .map_err(|e| anyhow::anyhow!("lock ttl out of range: {}", e).into())
    }

    /// Write our marker with `mode`. `None` when the write lost to another
    /// marker.
    async fn write_marker(
        &self,
        bucket: &str,
        key: &str,
        mode: WriteMode,
    ) -> StoreResult<Option<LockLease>> {
        let now = Utc::now();
        let marker = LockMarker {
            owner: self.owner.clone(),
            acquired_at: now,
            expires_at: now + self.ttl_delta()?,
        };
        let body = serde_json::to_vec(&marker).map_err(|e| anyhow::anyhow!(e))?;

        match self.storage.put(bucket, key, Bytes::from(body), mode).await {
            Ok(()) => Ok(Some(self.lease(bucket, key, marker.expires_at))),
            Err(StoreError::AlreadyExists { .. }) => Ok(None),
            // Conditional replace of a marker that was deleted meanwhile.
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn lease(&self, bucket: &str, key: &str, expires_at: DateTime<Utc>) -> LockLease {
        LockLease {
            bucket: bucket.to_string(),
            key: key.to_string(),
            owner: self.owner.clone(),
            expires_at,
        }
    }

    /// The marker at `key`, if any. Unreadable markers fall back to the
    /// object's modification time plus the TTL.
    ///
    /// Listed before it is read, so the returned version is never newer
    /// than the content it was judged on.
    async fn current_holder(&self, bucket: &str, key: &str) -> StoreResult<Option<Holder>> {
        let listed = self.storage.list(bucket, Some(key)).await?;
        let Some(meta) = listed.into_iter().find(|m| m.path == key) else {
            return Ok(None);
        };

        let (owner, expires_at) = match self.storage.download(bucket, key).await {
            Ok(bytes) => match serde_json::from_slice::<LockMarker>(&bytes) {
                Ok(marker) => (Some(marker.owner), Some(marker.expires_at)),
                Err(_) => {
                    warn!(bucket, key, "unreadable lock marker, using object age");
                    (None, None)
                }
            },
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let expires_at = match (expires_at, meta.last_modified) {
            (Some(at), _) => at,
            (None, Some(modified)) => modified + self.ttl_delta()?,
            (None, None) => return Ok(None),
        };

        Ok(Some(Holder {
            owner,
            expires_at,
            e_tag: meta.e_tag,
            version: meta.version,
        }))
    }

    /// A live marker written by this owner, e.g. by a create whose response
    /// was lost and then retried.
    fn own_lease(&self, bucket: &str, key: &str, holder: &Holder) -> Option<LockLease> {
        (holder.owner.as_deref() == Some(self.owner.as_str()) && holder.expires_at > Utc::now())
            .then(|| self.lease(bucket, key, holder.expires_at))
    }

    async fn settle_lost_write(&self, bucket: &str, key: &str) -> StoreResult<LockOutcome> {
        match self.current_holder(bucket, key).await? {
            Some(holder) => Ok(match self.own_lease(bucket, key, &holder) {
                Some(lease) => LockOutcome::Acquired(lease),
                None => LockOutcome::AlreadyHeld {
                    owner: holder.owner,
                    expires_at: Some(holder.expires_at),
                },
            }),
            None => Ok(LockOutcome::AlreadyHeld {
                owner: None,
                expires_at: None,
            }),
        }
    }
}

/// What [`ObjectLock`] knows about an existing marker.
struct Holder {
    owner: Option<String>,
    expires_at: DateTime<Utc>,
    e_tag: Option<String>,
    version: Option<String>,
}

#[async_trait]
impl<S: ObjectStorage> LockService for ObjectLock<S> {
    async fn acquire(&self, bucket: &str, key: &str) -> StoreResult<LockOutcome> {
        crate::validate_bucket(bucket)?;

        if let Some(lease) = self.write_marker(bucket, key, WriteMode::Create).await? {
            debug!(bucket, key, owner = %lease.owner, "lock acquired");
            return Ok(LockOutcome::Acquired(lease));
        }

        let Some(holder) = self.current_holder(bucket, key).await? else {
            // Holder released between our write and our read.
            return Ok(match self.write_marker(bucket, key, WriteMode::Create).await? {
                Some(lease) => LockOutcome::Acquired(lease),
                None => self.settle_lost_write(bucket, key).await?,
            });
        };

        if let Some(lease) = self.own_lease(bucket, key, &holder) {
            debug!(bucket, key, owner = %lease.owner, "lock marker already ours");
            return Ok(LockOutcome::Acquired(lease));
        }

        if holder.expires_at > Utc::now() {
            debug!(bucket, key, owner = ?holder.owner, expires_at = %holder.expires_at, "lock already held");
            return Ok(LockOutcome::AlreadyHeld {
                owner: holder.owner,
                expires_at: Some(holder.expires_at),
            });
        }

        if holder.e_tag.is_none() && holder.version.is_none() {
            return Err(anyhow::anyhow!(
                "expired lock {}/{} has no version to replace it against",
                bucket,
                key
            )
            .into());
        }

        warn!(bucket, key, owner = ?holder.owner, expires_at = %holder.expires_at, "replacing expired lock");
        let replace = WriteMode::Update {
            e_tag: holder.e_tag,
            version: holder.version,
        };
        match self.write_marker(bucket, key, replace).await? {
            Some(lease) => Ok(LockOutcome::Acquired(lease)),
            None => self.settle_lost_write(bucket, key).await,
        }
    }

    async fn release(&self, lease: &LockLease) -> StoreResult<()> {
        if let Some(holder) = self.current_holder(&lease.bucket, &lease.key).await? {
            if holder.owner.as_deref().is_some_and(|owner| owner != lease.owner) {
                warn!(bucket = %lease.bucket, key = %lease.key, owner = ?holder.owner, "lock taken over, not releasing");
                return Ok(());
            }
        }
        self.storage.delete_object(&lease.bucket, &lease.key).await?;
        debug!(bucket = %lease.bucket, key = %lease.key, "lock released");
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
