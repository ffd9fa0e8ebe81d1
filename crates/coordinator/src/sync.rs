//! Clone-or-refresh coordination for a single repository.
//!
//! ## State machine per key
//!
//! ```text
//! Unknown ──(no mirror)──▶ Creating ──▶ Ready
//!                                   └─▶ Failed, rolled back (directory removed)
//! Ready ──▶ Refreshing ──▶ Ready
//!                      └─▶ Ready with stale data (refresh failed, directory kept)
//! ```
//!
//! The filesystem is the source of truth: every sync re-reads it once the
//! repository's lock is held. The one piece of memory is the outcome of the
//! latest clone attempt. Requests that queued behind a failing clone share its
//! failure, while a request arriving after it finished simply tries again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use domain::{CanonicalMirrorKey, MirrorStore, MirrorSyncError, RepositoryLocator};
use tracing::{debug, info, instrument, warn};

use crate::{RepositoryGuard, RepositoryLockRegistry};

/// What a successful sync did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The mirror did not exist and was cloned.
    Created,
    /// The mirror existed and was refreshed.
    Refreshed,
}

/// Serialises mirror work per repository and drives the [`MirrorStore`].
pub struct MirrorCoordinator {
    mirror_root: PathBuf,
    store: Arc<dyn MirrorStore>,
    locks: RepositoryLockRegistry,
}

impl MirrorCoordinator {
    /// Creates a coordinator that keeps mirrors under `mirror_root`.
    pub fn new(mirror_root: impl Into<PathBuf>, store: Arc<dyn MirrorStore>) -> Self {
        Self {
            mirror_root: mirror_root.into(),
            store,
            locks: RepositoryLockRegistry::new(),
        }
    }

    /// The per-repository lock registry.
    pub fn locks(&self) -> &RepositoryLockRegistry {
        &self.locks
    }

    /// Brings the mirror for `key` up to date, cloning `locator` if no mirror
    /// exists yet.
    ///
    /// Blocks until this task holds the repository's lock; the lock is released
    /// on every exit path. Syncs for the same key are totally ordered; syncs for
    /// different keys run in parallel.
    ///
    /// # Errors
    ///
    /// - [`MirrorSyncError::Create`] if cloning failed, or if this call waited
    ///   on a clone of the same repository that failed. The partial mirror
    ///   directory has been removed.
    /// - [`MirrorSyncError::Refresh`] if refreshing an existing mirror failed.
    ///   The mirror directory is left untouched.
    /// - [`MirrorSyncError::UnsafeKey`], [`MirrorSyncError::PrepareRoot`], or
    ///   [`MirrorSyncError::Inspect`] for filesystem-level problems.
    #[instrument(skip_all, fields(locator = %locator, key = %key))]
    pub async fn sync(
        &self,
        locator: &RepositoryLocator,
        key: &CanonicalMirrorKey,
    ) -> Result<SyncOutcome, MirrorSyncError> {
        let mirror = key
            .mirror_path(&self.mirror_root)
            .ok_or_else(|| MirrorSyncError::UnsafeKey {
                locator: locator.clone(),
                key: key.clone(),
            })?;

        let lock = self.locks.lock_for(key);
        let seen = lock.finished_creates();
        let mut guard = lock.acquire().await;
        debug!("acquired repository lock");

        let exists = tokio::fs::try_exists(&mirror)
            .await
            .map_err(|source| MirrorSyncError::Inspect {
                path: mirror.clone(),
                source,
            })?;

        if exists {
            return self.refresh(locator, &mirror).await;
        }
        if let Some(failure) = guard.failed_create_since(seen) {
            warn!(error = %failure, "clone attempted while waiting failed; not retrying");
            return Err(MirrorSyncError::Create {
                locator: locator.clone(),
                source: failure.clone(),
            });
        }
        self.create(locator, key, &mirror, &mut guard).await
    }

    async fn create(
        &self,
        locator: &RepositoryLocator,
        key: &CanonicalMirrorKey,
        mirror: &Path,
        guard: &mut RepositoryGuard,
    ) -> Result<SyncOutcome, MirrorSyncError> {
        self.prepare_root().await?;

        info!(mirror_root = %self.mirror_root.display(), "cloning repository mirror");
        let result = self.store.create(locator, &self.mirror_root, key).await;
        guard.record_create(result.as_ref().map(|_| ()));
        match result {
            Ok(()) => {
                info!("successfully cloned repository mirror");
                Ok(SyncOutcome::Created)
            }
            Err(source) => {
                roll_back(&self.mirror_root, mirror).await;
                Err(MirrorSyncError::Create {
                    locator: locator.clone(),
                    source,
                })
            }
        }
    }

    async fn refresh(
        &self,
        locator: &RepositoryLocator,
        mirror: &Path,
    ) -> Result<SyncOutcome, MirrorSyncError> {
        info!(mirror = %mirror.display(), "updating repository mirror");
        self.store
            .refresh(mirror)
            .await
            .map_err(|source| MirrorSyncError::Refresh {
                locator: locator.clone(),
                mirror: mirror.to_path_buf(),
                source,
            })?;
        info!(mirror = %mirror.display(), "successfully updated repository mirror");

        self.store.compact(mirror).await;
        Ok(SyncOutcome::Refreshed)
    }

    async fn prepare_root(&self) -> Result<(), MirrorSyncError> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);

        builder
            .create(&self.mirror_root)
            .await
            .map_err(|source| MirrorSyncError::PrepareRoot {
                path: self.mirror_root.clone(),
                source,
            })
    }
}

impl std::fmt::Debug for MirrorCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorCoordinator")
            .field("mirror_root", &self.mirror_root)
            .field("repositories", &self.locks.repository_count())
            .finish_non_exhaustive()
    }
}

/// Removes whatever a failed clone left behind at `mirror`, then any parent
/// directories below `mirror_root` that are left empty.
async fn roll_back(mirror_root: &Path, mirror: &Path) {
    match tokio::fs::remove_dir_all(mirror).await {
        Ok(()) => debug!(mirror = %mirror.display(), "removed partial mirror"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(
                mirror = %mirror.display(),
                error = %e,
                "failed to remove partial mirror after clone failure"
            );
            return;
        }
    }

    let mut parent = mirror.parent();
    while let Some(dir) = parent.filter(|dir| dir.starts_with(mirror_root) && *dir != mirror_root) {
        // Fails on the first non-empty directory, which ends the walk.
        if tokio::fs::remove_dir(dir).await.is_err() {
            break;
        }
        parent = dir.parent();
    }
}
