//! Per-repository lock registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use domain::{CanonicalMirrorKey, StoreError};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The most recent clone attempt for one repository, guarded by its lock.
#[derive(Debug, Default)]
struct CreateRecord {
    last_failure: Option<StoreError>,
}

/// A mutual-exclusion handle for one repository's mirror.
///
/// Besides the mutex, the lock counts finished clone attempts so that a task
/// queued behind a failing clone can adopt that failure instead of cloning
/// again. Cloning the handle shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct RepositoryLock {
    record: Arc<Mutex<CreateRecord>>,
    creates: Arc<AtomicU64>,
}

impl RepositoryLock {
    /// Number of clone attempts that have finished under this lock.
    ///
    /// Read before [`acquire`](Self::acquire) and hand the value to
    /// [`RepositoryGuard::failed_create_since`] once the lock is held.
    pub fn finished_creates(&self) -> u64 {
        self.creates.load(Ordering::Acquire)
    }

    /// Waits until no other task holds this repository's lock, then takes it.
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn acquire(&self) -> RepositoryGuard {
        RepositoryGuard {
            record: Arc::clone(&self.record).lock_owned().await,
            creates: Arc::clone(&self.creates),
        }
    }

    /// Returns `true` if both handles refer to the same underlying mutex.
    pub fn same_lock_as(&self, other: &RepositoryLock) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }
}

/// Exclusive access to one repository, held until dropped.
#[derive(Debug)]
pub struct RepositoryGuard {
    record: OwnedMutexGuard<CreateRecord>,
    creates: Arc<AtomicU64>,
}

impl RepositoryGuard {
    /// The failure of the latest clone attempt, if that attempt failed and
    /// finished after `seen` was read from [`RepositoryLock::finished_creates`].
    pub fn failed_create_since(&self, seen: u64) -> Option<&StoreError> {
        if self.creates.load(Ordering::Acquire) == seen {
            return None;
        }
        self.record.last_failure.as_ref()
    }

    /// Records the outcome of a clone attempt made while holding this guard.
    pub fn record_create(&mut self, outcome: Result<(), &StoreError>) {
        self.record.last_failure = outcome.err().cloned();
        self.creates.fetch_add(1, Ordering::AcqRel);
    }
}

/// Maps canonical mirror keys to their [`RepositoryLock`].
///
/// Entries are created on demand and never removed, so memory grows with the
/// number of distinct repositories seen over the process lifetime.
///
/// Get-or-create is atomic: the map's own shard locks guard insertion, and they
/// are held only for the lookup itself, never while a repository lock is held
/// or awaited.
#[derive(Debug, Default)]
pub struct RepositoryLockRegistry {
    locks: DashMap<CanonicalMirrorKey, RepositoryLock>,
}

impl RepositoryLockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `key`, creating it if this key was never seen.
    ///
    /// Concurrent first-time callers for the same key all receive handles to the
    /// same mutex.
    pub fn lock_for(&self, key: &CanonicalMirrorKey) -> RepositoryLock {
        if let Some(existing) = self.locks.get(key) {
            return existing.value().clone();
        }
        self.locks.entry(key.clone()).or_default().value().clone()
    }

    /// Number of distinct repositories seen so far.
    pub fn repository_count(&self) -> usize {
        self.locks.len()
    }
}
