//! Mirror synchronisation for the Git webhook proxy.
//!
//! This crate guarantees that at most one clone-or-refresh runs per repository
//! at any moment, while unrelated repositories update in parallel.
//!
//! - [`RepositoryLockRegistry`] hands out one [`RepositoryLock`] per
//!   [`domain::CanonicalMirrorKey`], created on first sighting and kept for the
//!   lifetime of the process.
//! - [`MirrorCoordinator`] takes the lock for a key, checks the filesystem, and
//!   drives the [`domain::MirrorStore`] port to create or refresh the mirror.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The coordinator sequences calls between the domain
//! rules in [`domain`] and whichever [`domain::MirrorStore`] it is given. It
//! contains no knowledge of `git` command lines or HTTP.

pub mod registry;
pub mod sync;

pub use registry::{RepositoryGuard, RepositoryLock, RepositoryLockRegistry};
pub use sync::{MirrorCoordinator, SyncOutcome};
