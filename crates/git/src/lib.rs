//! Git infrastructure adapter.
//!
//! Implements the [`domain::MirrorStore`] port by running an external `git`
//! binary:
//!
//! | Operation | Command | Working directory |
//! |-----------|---------|-------------------|
//! | create | `git clone --mirror -- <locator> <key>` | mirror root |
//! | refresh | `git remote update --prune` | mirror |
//! | compact | `git gc --aggressive --auto` | mirror |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Command lines, process spawning, output capture, and the
//! optional timeout live here. The coordinator sees only
//! [`domain::MirrorStore`].
//!
//! Each call is a single attempt. Without a configured timeout a hung `git`
//! process hangs the calling request indefinitely.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use domain::{CanonicalMirrorKey, MirrorOperation, MirrorStore, RepositoryLocator, StoreError};
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// A [`MirrorStore`] backed by the `git` command-line client.
#[derive(Debug, Clone)]
pub struct GitMirrorStore {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl GitMirrorStore {
    /// Creates a store that runs the `git` binary at `program`, with no timeout.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Bounds every git invocation by `timeout`. `None` disables the bound.
    ///
    /// A process that outlives its timeout is killed and reported as
    /// [`StoreError::TimedOut`].
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(
        &self,
        operation: MirrorOperation,
        working_dir: &Path,
        args: &[&str],
    ) -> Result<(), StoreError> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .current_dir(working_dir)
            // Fail on missing credentials instead of waiting on a prompt nobody sees.
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %self.program.display(),
            ?args,
            dir = %working_dir.display(),
            "running git"
        );

        let output = match self.timeout {
            None => command.output().await,
            Some(limit) => match tokio::time::timeout(limit, command.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(StoreError::TimedOut {
                        operation,
                        after: limit,
                    })
                }
            },
        }
        .map_err(|source| StoreError::Spawn {
            operation,
            program: self.program.clone(),
            source,
        })?;

        trace!(%operation, status = %output.status, "git exited");
        if !output.stdout.is_empty() {
            trace!(%operation, stdout = %String::from_utf8_lossy(&output.stdout), "git stdout");
        }

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(%operation, %stderr, "git failed");
            Err(StoreError::Failed {
                operation,
                status: output.status.to_string(),
                stderr,
            })
        }
    }
}

#[async_trait]
impl MirrorStore for GitMirrorStore {
    async fn create(
        &self,
        locator: &RepositoryLocator,
        mirror_root: &Path,
        key: &CanonicalMirrorKey,
    ) -> Result<(), StoreError> {
        self.run(
            MirrorOperation::Create,
            mirror_root,
            &["clone", "--mirror", "--", locator.as_str(), key.as_str()],
        )
        .await
    }

    async fn refresh(&self, mirror: &Path) -> Result<(), StoreError> {
        self.run(MirrorOperation::Refresh, mirror, &["remote", "update", "--prune"])
            .await
    }

    async fn compact(&self, mirror: &Path) {
        if let Err(e) = self
            .run(MirrorOperation::Compact, mirror, &["gc", "--aggressive", "--auto"])
            .await
        {
            warn!(mirror = %mirror.display(), error = %e, "ignoring failed mirror compaction");
        }
    }
}
