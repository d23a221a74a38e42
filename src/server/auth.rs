//! User identity extraction.
//!
//! Authentication provenance is out of scope here: callers present an
//! opaque user identity in the `x-user-id` header and only its shape is
//! validated. Every authenticated route takes this extractor, so a
//! missing or malformed identity is rejected before any handler runs.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::chat::core::errors::ChatError;
use crate::chat::core::ids::UserId;

/// Header carrying the caller's opaque user identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated user identity for a request.
#[derive(Clone, Copy, Debug)]
pub struct AuthedUser(pub UserId);

impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ChatError::Auth("Not authorized, user identity missing.".to_string()))?;
        let value = header
            .to_str()
            .map_err(|_| ChatError::Auth("Not authorized, invalid user identity.".to_string()))?;
        let user_id: UserId = value
            .parse()
            .map_err(|_| ChatError::Auth("Not authorized, invalid user identity.".to_string()))?;

        Ok(Self(user_id))
    }
}
