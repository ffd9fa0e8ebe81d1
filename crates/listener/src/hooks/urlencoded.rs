//! Strict `application/x-www-form-urlencoded` decoding.
//!
//! `form_urlencoded::parse` is lenient: it passes bad escapes through and
//! treats `;` as ordinary data. Webhook senders that produce either are
//! rejected here before decoding.

use url::form_urlencoded;

/// Decodes `raw` into name/value pairs, in order.
pub(super) fn decode(raw: &[u8]) -> Result<Vec<(String, String)>, String> {
    validate(raw)?;
    Ok(form_urlencoded::parse(raw).into_owned().collect())
}

/// The first value for `name`, if present.
pub(super) fn first_value(pairs: Vec<(String, String)>, name: &str) -> Option<String> {
    pairs
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}

fn validate(raw: &[u8]) -> Result<(), String> {
    for (index, byte) in raw.iter().enumerate() {
        match byte {
            b';' => return Err(format!("invalid semicolon separator at byte {index}")),
            b'%' => {
                let escape = raw.get(index + 1..index + 3);
                if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                    return Err(format!("invalid percent escape at byte {index}"));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
