//! The webhook parser family.
//!
//! Each [`HookKind`] knows how to find the repository locator in one webhook
//! shape. The variant is chosen once, by the route a request arrives on, and is
//! never guessed from the payload.
//!
//! | Variant | Config name | Where the locator lives |
//! |---------|-------------|-------------------------|
//! | [`HookKind::JenkinsQuery`] | `jenkins` | `url` query parameter |
//! | [`HookKind::GitHubForm`] | `github-form` | form field `payload` → JSON `repository.url`, converted to `git@host:path.git` |
//! | [`HookKind::GitHubJson`] | `github-json` | raw JSON body → `repository.url`, converted to `git@host:path.git` |
//! | [`HookKind::BitbucketForm`] | `bitbucket` | form field `payload` → JSON `canon_url` + `repository.absolute_url`, converted to `git@host:path.git` |
//!
//! A malformed query string or body is a [`ParseError`]. A well-formed request
//! that simply lacks the locator yields `Ok(None)`.

mod form;
mod payload;
mod urlencoded;

use std::str::FromStr;

use domain::{ParseError, RepositoryLocator};
use thiserror::Error;

use crate::WebhookRequest;

/// Form field carrying the JSON payload in form-encoded webhooks.
const PAYLOAD_FIELD: &str = "payload";

/// Query parameter carrying the repository URL in Jenkins-style notifications.
const JENKINS_URL_PARAMETER: &str = "url";

/// A supported webhook shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Jenkins Git plugin `notifyCommit` call.
    JenkinsQuery,
    /// GitHub push webhook delivered as `application/x-www-form-urlencoded`.
    GitHubForm,
    /// GitHub push webhook delivered as `application/json`.
    GitHubJson,
    /// Bitbucket POST service hook, form-encoded.
    BitbucketForm,
}

impl HookKind {
    /// Every supported variant.
    pub const ALL: [HookKind; 4] = [
        HookKind::JenkinsQuery,
        HookKind::GitHubForm,
        HookKind::GitHubJson,
        HookKind::BitbucketForm,
    ];

    /// Extracts the repository locator this webhook refers to.
    ///
    /// Never consumes the request body.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the query string, form body, or JSON payload
    /// is malformed.
    pub fn locator_from(
        self,
        request: &WebhookRequest,
    ) -> Result<Option<RepositoryLocator>, ParseError> {
        match self {
            Self::JenkinsQuery => Ok(form::query_value(request, JENKINS_URL_PARAMETER)?
                .and_then(RepositoryLocator::new)),
            Self::GitHubForm => match form::form_value(request, PAYLOAD_FIELD)? {
                Some(json) => payload::github_locator(json.as_bytes()),
                None => Ok(None),
            },
            Self::GitHubJson => payload::github_locator(&request.body()),
            Self::BitbucketForm => match form::form_value(request, PAYLOAD_FIELD)? {
                Some(json) => payload::bitbucket_locator(json.as_bytes()),
                None => Ok(None),
            },
        }
    }

    /// Name used in logs and error responses.
    pub fn name(self) -> &'static str {
        match self {
            Self::JenkinsQuery => "JenkinsQueryHook",
            Self::GitHubForm => "GitHubFormHook",
            Self::GitHubJson => "GitHubJsonHook",
            Self::BitbucketForm => "BitbucketFormHook",
        }
    }

    /// Name used to select this variant in route configuration.
    pub fn config_name(self) -> &'static str {
        match self {
            Self::JenkinsQuery => "jenkins",
            Self::GitHubForm => "github-form",
            Self::GitHubJson => "github-json",
            Self::BitbucketForm => "bitbucket",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The configured hook name matches no [`HookKind`].
#[derive(Debug, Error)]
#[error("unknown webhook kind '{name}' (expected one of: jenkins, github-form, github-json, bitbucket)")]
pub struct UnknownHookKind {
    /// The name that was given.
    pub name: String,
}

impl FromStr for HookKind {
    type Err = UnknownHookKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.config_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownHookKind {
                name: s.to_string(),
            })
    }
}
