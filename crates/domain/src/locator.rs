//! Locator normalisation.
//!
//! Webhooks name the same repository in many spellings: different schemes,
//! explicit ports, embedded users, mixed case, trailing slashes, with or
//! without `.git`. [`canonicalize`] folds all of them into one
//! [`CanonicalMirrorKey`] so that every spelling maps to the same mirror and
//! the same repository lock.

use percent_encoding::percent_decode_str;
use tracing::debug;
use url::Url;

use crate::{CanonicalMirrorKey, ParseError, RepositoryLocator};

const GIT_SUFFIX: &str = ".git";

/// Converts any accepted locator spelling into its canonical mirror key.
///
/// 1. Trim surrounding whitespace, one trailing `/`, and a trailing `.git`;
///    lower-case the result.
/// 2. URL form (contains `://`): keep the host without port or user, followed
///    by the percent-decoded path.
/// 3. SCP-like form: drop everything up to and including the first `@`, then
///    replace the first `:` with `/`.
///
/// Runs of `/` are collapsed and `.git` is appended. Only the first `@` and
/// first `:` of an SCP-like locator are significant.
///
/// This never fails. Garbage input produces a syntactically valid but
/// meaningless key; reachability surfaces later as a clone failure.
pub fn canonicalize(locator: &RepositoryLocator) -> CanonicalMirrorKey {
    let trimmed = locator.as_str().trim();
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(GIT_SUFFIX).unwrap_or(trimmed);
    let lowered = trimmed.to_lowercase();

    let location = if lowered.contains("://") {
        url_location(&lowered)
    } else {
        scp_location(&lowered)
    };

    CanonicalMirrorKey::from_normalized(format!("{}{GIT_SUFFIX}", collapse_slashes(&location)))
}

/// Converts an HTTP(S) repository URL into an SCP-style `git@host:path.git`
/// locator.
///
/// Used for webhook formats that only announce the repository's web URL. The
/// port is dropped, since the HTTP port says nothing about the SSH one.
///
/// # Errors
///
/// Returns [`ParseError::UnconvertibleUrl`] if `http_url` is not an absolute
/// URL with a host and a non-empty path.
pub fn scp_locator_from_http(http_url: &str) -> Result<RepositoryLocator, ParseError> {
    let unconvertible = |reason: &str| ParseError::UnconvertibleUrl {
        url: http_url.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(http_url).map_err(|e| unconvertible(&e.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| unconvertible("no host"))?;
    let path = url.path().trim_matches('/');
    let path = path.strip_suffix(GIT_SUFFIX).unwrap_or(path);
    if path.is_empty() {
        return Err(unconvertible("no repository path"));
    }

    RepositoryLocator::new(format!("git@{host}:{path}{GIT_SUFFIX}"))
        .ok_or_else(|| unconvertible("empty locator"))
}

fn url_location(locator: &str) -> String {
    match Url::parse(locator) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let path = percent_decode_str(url.path()).decode_utf8_lossy();
            join_host_and_path(host, &path)
        }
        Err(error) => {
            debug!(%error, locator, "locator is not a parseable URL; splitting it by hand");
            split_url_by_hand(locator)
        }
    }
}

fn split_url_by_hand(locator: &str) -> String {
    let rest = locator.split_once("://").map_or(locator, |(_, rest)| rest);
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host.split_once(':').map_or(host, |(host, _)| host);
    join_host_and_path(host, path)
}

fn join_host_and_path(host: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        host.to_string()
    } else {
        format!("{host}/{path}")
    }
}

fn scp_location(locator: &str) -> String {
    let without_user = locator.split_once('@').map_or(locator, |(_, rest)| rest);
    without_user.replacen(':', "/", 1)
}

fn collapse_slashes(location: &str) -> String {
    let mut collapsed = String::with_capacity(location.len());
    for ch in location.chars() {
        if ch == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(ch);
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_for(raw: &str) -> String {
        let locator = RepositoryLocator::new(raw).expect("non-empty locator");
        canonicalize(&locator).as_str().to_string()
    }

    const VECTORS: &[(&str, &str)] = &[
        ("ssh://host.xz/path/to/repo.git/", "host.xz/path/to/repo.git"),
        ("ssh://host.xz:22/path/to/repo.git/", "host.xz/path/to/repo.git"),
        ("ssh://user@host.xz:22/path/to/repo.git/", "host.xz/path/to/repo.git"),
        ("git://host.xz/path/to/repo.git/", "host.xz/path/to/repo.git"),
        ("git://host.xz:22/path/to/repo.git/", "host.xz/path/to/repo.git"),
        ("git://user@host.xz:9418/path/to/repo.git/", "host.xz/path/to/repo.git"),
        ("http://git.example.com/user/My-Repo", "git.example.com/user/my-repo.git"),
        ("https://git.example.com:8443/user/My-Repo", "git.example.com/user/my-repo.git"),
        ("https://scm@git.example.com:8443/user/My-Repo.git", "git.example.com/user/my-repo.git"),
        ("example.com:/a/b/c/", "example.com/a/b/c.git"),
        ("git@github.com:example/testing", "github.com/example/testing.git"),
        ("git@git.assembla.com:foo-bar-app.git", "git.assembla.com/foo-bar-app.git"),
        ("  ssh://git@example.com/team/app.git \n", "example.com/team/app.git"),
        ("https://git.example.com/team/my%20repo", "git.example.com/team/my repo.git"),
        ("https://git.example.com/team/my repo", "git.example.com/team/my repo.git"),
    ];

    #[test]
    fn known_spellings_normalise_to_expected_keys() {
        for (input, expected) in VECTORS {
            assert_eq!(key_for(input), *expected, "input: {input}");
        }
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for (input, _) in VECTORS {
            let once = key_for(input);
            assert_eq!(key_for(&once), once, "input: {input}");
        }
    }

    #[test]
    fn only_first_colon_of_scp_form_is_replaced() {
        assert_eq!(key_for("git@host:team/a:b"), "host/team/a:b.git");
    }

    #[test]
    fn only_first_at_sign_is_stripped() {
        assert_eq!(key_for("git@host:team/x@y"), "host/team/x@y.git");
    }

    #[test]
    fn unparseable_url_is_split_by_hand() {
        assert_eq!(key_for("https://user@bad host:99/a/b"), "bad host/a/b.git");
    }

    #[test]
    fn http_url_converts_to_scp_locator() {
        let locator = scp_locator_from_http("https://bitbucket.org/acme/widgets").unwrap();
        assert_eq!(locator.as_str(), "git@bitbucket.org:acme/widgets.git");

        let locator = scp_locator_from_http("https://bitbucket.org:8443/acme/widgets.git/").unwrap();
        assert_eq!(locator.as_str(), "git@bitbucket.org:acme/widgets.git");
    }

    #[test]
    fn http_url_without_path_is_unconvertible() {
        let err = scp_locator_from_http("https://bitbucket.org/").unwrap_err();
        assert!(matches!(err, ParseError::UnconvertibleUrl { .. }));
        assert!(scp_locator_from_http("/acme/widgets").is_err());
    }

    #[test]
    fn converted_locator_shares_key_with_http_url() {
        let http = RepositoryLocator::new("https://bitbucket.org/Acme/Widgets").unwrap();
        let scp = scp_locator_from_http(http.as_str()).unwrap();
        assert_eq!(canonicalize(&http), canonicalize(&scp));
    }
}
