//! Conversion between API group ids and backend group ids.
//!
//! The API exposes `group.` followed by the base64 encoding of the backend's
//! own id, so ids survive URL paths and can be told apart from numbers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use signal_rest_types::GROUP_PREFIX;

pub fn api_group_id(internal_id: &str) -> String {
    format!("{GROUP_PREFIX}{}", STANDARD.encode(internal_id.as_bytes()))
}

/// Backend id for an API group id, or `None` if `api_id` is not one.
pub fn internal_group_id(api_id: &str) -> Option<String> {
    let encoded = api_id.strip_prefix(GROUP_PREFIX)?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let internal = String::from_utf8(decoded).ok()?;
    (!internal.is_empty()).then_some(internal)
}
