//! Exact-match routing from request path to webhook parser.

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use crate::hooks::{HookKind, UnknownHookKind};

/// Path on which Jenkins-style `notifyCommit` calls arrive.
pub const JENKINS_NOTIFY_COMMIT_PATH: &str = "/git/notifyCommit";

/// Path on which the Jenkins GitHub plugin receives push webhooks.
pub const GITHUB_WEBHOOK_PATH: &str = "/github-webhook/";

/// Maps request paths to the [`HookKind`] that parses them.
///
/// Matching is exact: no prefixes, no trailing-slash folding, and the query
/// string plays no part.
#[derive(Debug, Clone)]
pub struct WebhookRouter {
    routes: HashMap<String, HookKind>,
}

impl WebhookRouter {
    /// A router with no routes; every request is unmatched.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// The standard route table:
    ///
    /// | Path | Hook |
    /// |------|------|
    /// | `/git/notifyCommit` | [`HookKind::JenkinsQuery`] |
    /// | `/github-webhook/` | [`HookKind::GitHubForm`] |
    pub fn default_routes() -> Self {
        Self::empty()
            .with_route(JENKINS_NOTIFY_COMMIT_PATH, HookKind::JenkinsQuery)
            .with_route(GITHUB_WEBHOOK_PATH, HookKind::GitHubForm)
    }

    /// Adds or replaces the route for `path`.
    #[must_use]
    pub fn with_route(mut self, path: impl Into<String>, hook: HookKind) -> Self {
        self.routes.insert(path.into(), hook);
        self
    }

    /// The parser for `path`, if one is registered.
    pub fn resolve(&self, path: &str) -> Option<HookKind> {
        self.routes.get(path).copied()
    }

    /// Registered routes, sorted by path.
    pub fn routes(&self) -> Vec<(&str, HookKind)> {
        let mut routes: Vec<_> = self
            .routes
            .iter()
            .map(|(path, hook)| (path.as_str(), *hook))
            .collect();
        routes.sort_unstable_by_key(|(path, _)| *path);
        routes
    }
}

impl Default for WebhookRouter {
    fn default() -> Self {
        Self::default_routes()
    }
}

// ---------------------------------------------------------------------------
// Route flags
// ---------------------------------------------------------------------------

/// One `PATH=KIND` route, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Exact request path, starting with `/`.
    pub path: String,
    /// Parser for requests on `path`.
    pub hook: HookKind,
}

/// A `PATH=KIND` route could not be parsed.
#[derive(Debug, Error)]
pub enum RouteParseError {
    /// No `=` between path and kind.
    #[error("route '{route}' must have the form PATH=KIND")]
    MissingSeparator { route: String },

    /// The path is not absolute.
    #[error("route path '{path}' must start with '/'")]
    RelativePath { path: String },

    /// The kind names no known parser.
    #[error(transparent)]
    UnknownHook(#[from] UnknownHookKind),
}

impl FromStr for Route {
    type Err = RouteParseError;

    fn from_str(route: &str) -> Result<Self, Self::Err> {
        let (path, hook) = route
            .rsplit_once('=')
            .ok_or_else(|| RouteParseError::MissingSeparator {
                route: route.to_string(),
            })?;
        let path = path.trim();
        if !path.starts_with('/') {
            return Err(RouteParseError::RelativePath {
                path: path.to_string(),
            });
        }
        Ok(Self {
            path: path.to_string(),
            hook: hook.parse()?,
        })
    }
}
