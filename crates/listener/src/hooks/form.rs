//! Query-string and form-field lookup.

use domain::ParseError;

use super::urlencoded;
use crate::WebhookRequest;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Looks up `name` in the request's query string.
pub(super) fn query_value(
    request: &WebhookRequest,
    name: &str,
) -> Result<Option<String>, ParseError> {
    Ok(query_pairs(request)?.and_then(|pairs| urlencoded::first_value(pairs, name)))
}

/// Looks up `name` in a form-encoded body, falling back to the query string.
///
/// The body is only consulted when the request declares it as
/// `application/x-www-form-urlencoded`; body values win over query values.
/// A malformed query string is an error even when the body holds the value.
pub(super) fn form_value(
    request: &WebhookRequest,
    name: &str,
) -> Result<Option<String>, ParseError> {
    let from_body = if request.has_content_type(FORM_CONTENT_TYPE) {
        let body = request.body();
        let pairs =
            urlencoded::decode(&body).map_err(|reason| ParseError::MalformedForm { reason })?;
        urlencoded::first_value(pairs, name)
    } else {
        None
    };
    let query = query_pairs(request)?;

    Ok(from_body.or_else(|| query.and_then(|pairs| urlencoded::first_value(pairs, name))))
}

fn query_pairs(request: &WebhookRequest) -> Result<Option<Vec<(String, String)>>, ParseError> {
    request
        .query()
        .map(|query| {
            urlencoded::decode(query.as_bytes())
                .map_err(|reason| ParseError::MalformedQuery { reason })
        })
        .transpose()
}
