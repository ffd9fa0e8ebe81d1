//! Newtype domain identifiers.
//!
//! A raw [`RepositoryLocator`] and the [`CanonicalMirrorKey`] derived from it
//! are both strings under the hood, but they are never interchangeable: only a
//! key is safe to use as a filesystem path, and only a locator is what gets
//! handed to the external `git` binary.

use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

// ---------------------------------------------------------------------------
// Repository locator
// ---------------------------------------------------------------------------

/// The raw, possibly non-canonical string identifying a remote Git
/// repository, as extracted from a webhook payload.
///
/// Accepted spellings are URL form (`scheme://[user@]host[:port]/path[.git]`)
/// and SCP-like form (`[user@]host:path[.git]`). The value is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryLocator(String);

impl RepositoryLocator {
    /// Creates a new locator, returning `None` if the value is empty or
    /// consists only of whitespace.
    ///
    /// A webhook that yields no locator is reported as "no repository found"
    /// by the caller, never as a parse failure.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        if v.trim().is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }

    /// Returns the locator as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepositoryLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Canonical mirror key
// ---------------------------------------------------------------------------

/// The normalised identifier of a remote repository, of the form
/// `host/path.git`.
///
/// Only [`crate::canonicalize`] constructs keys, so every key is lower-cased,
/// port-stripped, user-stripped, and suffixed with `.git`. The key doubles as
/// the mirror's path relative to the mirror root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalMirrorKey(String);

impl CanonicalMirrorKey {
    pub(crate) fn from_normalized(value: String) -> Self {
        Self(value)
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves the mirror directory for this key under `mirror_root`.
    ///
    /// Returns `None` when the key would escape the mirror root, i.e. when its
    /// relative path contains anything other than plain named segments.
    pub fn mirror_path(&self, mirror_root: &Path) -> Option<PathBuf> {
        let relative = Path::new(&self.0);
        let mut components = relative.components().peekable();
        components.peek()?;
        if components.all(|c| matches!(c, Component::Normal(_))) {
            Some(mirror_root.join(relative))
        } else {
            None
        }
    }
}

impl std::fmt::Display for CanonicalMirrorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Request correlation
// ---------------------------------------------------------------------------

/// Identifies a single inbound webhook request.
///
/// Generated fresh for every request and attached to its tracing span so all
/// activity on behalf of one webhook (parsing, locking, git, forwarding) can be
/// correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
