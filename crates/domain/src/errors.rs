//! Error types for the webhook proxy domain.
//!
//! The taxonomy follows the request lifecycle:
//!
//! - [`ParseError`]: the webhook request itself is malformed.
//! - [`StoreError`]: a single external mirror operation failed.
//! - [`MirrorSyncError`]: bringing a mirror up to date failed; wraps the
//!   [`StoreError`] (or filesystem error) that caused it.
//!
//! "No repository found" is absent here: a parser that succeeds
//! but finds no locator returns `Ok(None)`, and the request handler turns that
//! into its own error. None of these errors is retried anywhere.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::{CanonicalMirrorKey, MirrorOperation, RepositoryLocator};

// ---------------------------------------------------------------------------
// Webhook parsing
// ---------------------------------------------------------------------------

/// The inbound request could not be parsed by a webhook parser.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The query string is not valid `application/x-www-form-urlencoded` data.
    #[error("malformed query string: {reason}")]
    MalformedQuery {
        /// What was wrong with the query string.
        reason: String,
    },

    /// The request body is not valid `application/x-www-form-urlencoded` data.
    #[error("malformed form body: {reason}")]
    MalformedForm {
        /// What was wrong with the form body.
        reason: String,
    },

    /// The JSON payload is present but does not parse.
    #[error("malformed JSON payload: {source}")]
    MalformedJson {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The payload announced a web URL that cannot be turned into a Git locator.
    #[error("cannot derive a Git locator from URL '{url}': {reason}")]
    UnconvertibleUrl {
        /// The URL found in the payload.
        url: String,
        /// Why the conversion failed.
        reason: String,
    },

    /// The request body could not be buffered.
    #[error("request body could not be read: {reason}")]
    UnreadableBody {
        /// Description of the read failure (e.g. size limit exceeded).
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// External mirror operations
// ---------------------------------------------------------------------------

/// A single external mirror operation failed.
///
/// Produced by [`crate::MirrorStore`] implementations. Each call is one attempt;
/// there is no retry at this level.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The version-control binary could not be executed at all.
    #[error("could not run '{}' for {operation}: {source}", .program.display())]
    Spawn {
        /// The operation being attempted.
        operation: MirrorOperation,
        /// Path of the binary that failed to start.
        program: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The binary ran but reported failure.
    #[error("{operation} failed with {status}: {stderr}")]
    Failed {
        /// The operation being attempted.
        operation: MirrorOperation,
        /// The process exit status, as reported by the OS.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The binary did not finish within the configured timeout and was killed.
    #[error("{operation} did not finish within {after:?}")]
    TimedOut {
        /// The operation being attempted.
        operation: MirrorOperation,
        /// The timeout that expired.
        after: Duration,
    },
}

// `std::io::Error` is not `Clone`; a copied spawn failure keeps its kind and
// message.
impl Clone for StoreError {
    fn clone(&self) -> Self {
        match self {
            Self::Spawn {
                operation,
                program,
                source,
            } => Self::Spawn {
                operation: *operation,
                program: program.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::Failed {
                operation,
                status,
                stderr,
            } => Self::Failed {
                operation: *operation,
                status: status.clone(),
                stderr: stderr.clone(),
            },
            Self::TimedOut { operation, after } => Self::TimedOut {
                operation: *operation,
                after: *after,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Mirror synchronisation
// ---------------------------------------------------------------------------

/// Bringing a mirror up to date failed.
///
/// Every variant terminates the current webhook request; nothing is forwarded
/// to the backend.
#[derive(Debug, Error)]
pub enum MirrorSyncError {
    /// The mirror did not exist and cloning it failed.
    ///
    /// Any partially written mirror directory has been removed.
    #[error("Failed to clone {locator}: {source}")]
    Create {
        /// The locator that was being cloned.
        locator: RepositoryLocator,
        /// The underlying store failure.
        #[source]
        source: StoreError,
    },

    /// The mirror existed but refreshing it failed.
    ///
    /// The existing mirror is left in place.
    #[error("Failed to update {} (for {locator}): {source}", .mirror.display())]
    Refresh {
        /// The locator whose mirror was being refreshed.
        locator: RepositoryLocator,
        /// The mirror directory.
        mirror: PathBuf,
        /// The underlying store failure.
        #[source]
        source: StoreError,
    },

    /// The mirror root directory could not be created.
    #[error("Failed to create mirror root {}: {source}", .path.display())]
    PrepareRoot {
        /// The mirror root directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Whether the mirror exists could not be determined.
    #[error("Failed to inspect mirror {}: {source}", .path.display())]
    Inspect {
        /// The mirror directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The canonical key does not describe a path inside the mirror root.
    #[error("Refusing to mirror {locator}: key '{key}' escapes the mirror root")]
    UnsafeKey {
        /// The locator the key was derived from.
        locator: RepositoryLocator,
        /// The offending key.
        key: CanonicalMirrorKey,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_spawn_failure_keeps_kind_and_message() {
        let original = StoreError::Spawn {
            operation: MirrorOperation::Create,
            program: PathBuf::from("/usr/bin/git"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };

        let copy = original.clone();

        assert_eq!(copy.to_string(), original.to_string());
        match copy {
            StoreError::Spawn { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
