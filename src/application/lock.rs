//! Distributed single-flight lock.
//!
//! Acquisition is an atomic set-if-absent with a TTL so a crashed
//! holder never wedges the fleet. Release is best-effort: a lease that
//! has (or may have) expired is left alone rather than risk deleting a
//! later holder's lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

pub const BUILD_LOCK_KEY: &str = "build";
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(600);

/// Safety margin subtracted from the TTL when deciding whether a lease
/// is still safely ours at release time.
const RELEASE_MARGIN: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store failure: {0}")]
    Store(String),
}

/// Atomic KV primitive the lock is built on.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key -> owner` iff absent (or the existing entry's TTL has
    /// lapsed). Returns whether this call took ownership.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration)
    -> Result<bool, LockError>;

    /// Delete `key` iff it is still owned by `owner`.
    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError>;
}

pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Attempt to take `key`. `None` means another holder has it.
    pub async fn acquire(&self, key: &str) -> Result<Option<LockLease>, LockError> {
        let owner = uuid::Uuid::new_v4().to_string();
        if !self.store.try_acquire(key, &owner, self.ttl).await? {
            debug!(target = "application::lock", key, "lock held elsewhere");
            return Ok(None);
        }
        debug!(target = "application::lock", key, owner, "lock acquired");
        Ok(Some(LockLease {
            store: Arc::clone(&self.store),
            key: key.to_string(),
            owner,
            release_deadline: Instant::now() + self.ttl.saturating_sub(RELEASE_MARGIN),
        }))
    }
}

/// Held lock. Call [`LockLease::release`] when done; dropping without
/// releasing leaves the key to expire by TTL.
pub struct LockLease {
    store: Arc<dyn LockStore>,
    key: String,
    owner: String,
    release_deadline: Instant,
}

impl LockLease {
    pub async fn release(self) -> Result<(), LockError> {
        if Instant::now() >= self.release_deadline {
            warn!(
                target = "application::lock",
                key = %self.key,
                "lease at or past expiry; leaving key to lapse"
            );
            return Ok(());
        }
        self.store.release(&self.key, &self.owner).await
    }
}

/// In-process lock store, used by tests and single-node deployments
/// that skip the shared database table.
#[derive(Default)]
pub struct MemoryLockStore {
    entries: std::sync::Mutex<std::collections::HashMap<String, (String, Instant)>>,
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at > now => Ok(false),
            _ => {
                entries.insert(key.to_string(), (owner.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.get(key).is_some_and(|(held_by, _)| held_by == owner) {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let store = Arc::new(MemoryLockStore::default());
        let lock = DistributedLock::new(store, DEFAULT_LOCK_TTL);

        let lease = lock.acquire(BUILD_LOCK_KEY).await.unwrap().unwrap();
        assert!(lock.acquire(BUILD_LOCK_KEY).await.unwrap().is_none());

        lease.release().await.unwrap();
        assert!(lock.acquire(BUILD_LOCK_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_entry_can_be_stolen() {
        let store = Arc::new(MemoryLockStore::default());
        let lock = DistributedLock::new(store, Duration::from_millis(10));

        let _stale = lock.acquire(BUILD_LOCK_KEY).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lock.acquire(BUILD_LOCK_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn release_of_expired_lease_does_not_delete() {
        let store = Arc::new(MemoryLockStore::default());
        // TTL below the release margin, so the lease is considered
        // expired immediately.
        let lock = DistributedLock::new(Arc::clone(&store) as Arc<dyn LockStore>, Duration::from_secs(1));
        let lease = lock.acquire(BUILD_LOCK_KEY).await.unwrap().unwrap();

        // Another holder steals the key after we stop being safe.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = DistributedLock::new(store, DEFAULT_LOCK_TTL);
        let theirs = second.acquire(BUILD_LOCK_KEY).await.unwrap().unwrap();

        lease.release().await.unwrap();
        // The later holder's key must survive our release.
        assert!(second.acquire(BUILD_LOCK_KEY).await.unwrap().is_none());
        theirs.release().await.unwrap();
    }
}
