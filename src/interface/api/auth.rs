//! Request identity extraction
//!
//! Auth itself lives outside this subsystem. The gateway in front of us
//! resolves the session and forwards the identity in headers; absent
//! headers mean an anonymous request.

use crate::domain::identity::{Identity, StaticIdentity};
use axum::http::HeaderMap;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const DISPLAY_NAME_HEADER: &str = "x-display-name";
pub const AVATAR_URL_HEADER: &str = "x-avatar-url";

pub fn identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let id = headers
        .get(USER_ID_HEADER)?
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw).ok())?;

    let display_name = headers
        .get(DISPLAY_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let avatar_url = headers
        .get(AVATAR_URL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    Some(Identity {
        id,
        display_name,
        avatar_url,
    })
}

/// Identity provider view of one request's headers
pub fn request_identity(headers: &HeaderMap) -> StaticIdentity {
    match identity_from_headers(headers) {
        Some(identity) => StaticIdentity::signed_in(identity),
        None => StaticIdentity::anonymous(),
    }
}
