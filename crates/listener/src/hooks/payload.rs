//! JSON payload shapes for GitHub and Bitbucket push notifications.
//!
//! Payloads are walked as untyped [`serde_json::Value`]s: any well-formed JSON
//! is accepted, and a missing or non-string field means "no locator".

use domain::{scp_locator_from_http, ParseError, RepositoryLocator};
use serde_json::Value;

/// `repository.url` from a GitHub push payload, converted to
/// `git@host:path.git` form so the mirror is cloned over SSH.
pub(super) fn github_locator(json: &[u8]) -> Result<Option<RepositoryLocator>, ParseError> {
    let Some(payload) = parse(json)? else {
        return Ok(None);
    };
    match string_at(&payload, &["repository", "url"]) {
        Some(url) if !url.trim().is_empty() => scp_locator_from_http(url.trim()).map(Some),
        _ => Ok(None),
    }
}

/// `canon_url` + `repository.absolute_url` from a Bitbucket POST hook,
/// converted to `git@host:path.git` form.
pub(super) fn bitbucket_locator(json: &[u8]) -> Result<Option<RepositoryLocator>, ParseError> {
    let Some(payload) = parse(json)? else {
        return Ok(None);
    };
    let (Some(base), Some(path)) = (
        string_at(&payload, &["canon_url"]),
        string_at(&payload, &["repository", "absolute_url"]),
    ) else {
        return Ok(None);
    };
    if base.trim().is_empty() || path.trim().is_empty() {
        return Ok(None);
    }

    let web_url = format!("{base}{path}");
    let web_url = web_url.strip_suffix('/').unwrap_or(&web_url);
    scp_locator_from_http(web_url).map(Some)
}

/// Blank input is "no payload"; anything else must be valid JSON.
fn parse(json: &[u8]) -> Result<Option<Value>, ParseError> {
    if json.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(json)
        .map(Some)
        .map_err(|source| ParseError::MalformedJson { source })
}

fn string_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |node, field| node.get(field))
        .and_then(Value::as_str)
}
