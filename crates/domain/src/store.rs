//! The mirror store port.
//!
//! [`MirrorStore`] wraps the three external operations that keep a bare
//! mirror current. The `git` crate implements it over a `git` binary; tests
//! substitute in-memory fakes.

use std::path::Path;

use async_trait::async_trait;

use crate::{CanonicalMirrorKey, RepositoryLocator, StoreError};

/// One of the external mirror operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorOperation {
    /// Create a new bare mirror clone.
    Create,
    /// Fetch all remote refs, pruning refs deleted upstream.
    Refresh,
    /// Best-effort garbage collection.
    Compact,
}

impl std::fmt::Display for MirrorOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "mirror clone",
            Self::Refresh => "mirror refresh",
            Self::Compact => "mirror compaction",
        };
        write!(f, "{name}")
    }
}

/// External operations on filesystem-resident mirrors.
///
/// Implementations make exactly one attempt per call. Callers are responsible
/// for mutual exclusion: a store never sees two concurrent operations for the
/// same mirror when driven by the coordinator.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Clones `locator` as a bare mirror into `mirror_root/key`.
    ///
    /// The mirror root exists when this is called; the target directory does
    /// not. On failure the target may have been partially written; cleaning it
    /// up is the caller's job.
    async fn create(
        &self,
        locator: &RepositoryLocator,
        mirror_root: &Path,
        key: &CanonicalMirrorKey,
    ) -> Result<(), StoreError>;

    /// Fetches all remote refs into the existing mirror at `mirror`, pruning
    /// refs deleted upstream.
    async fn refresh(&self, mirror: &Path) -> Result<(), StoreError>;

    /// Reclaims storage in the mirror at `mirror`.
    ///
    /// Never required for correctness: failures are logged by the
    /// implementation and never returned.
    async fn compact(&self, mirror: &Path);
}
