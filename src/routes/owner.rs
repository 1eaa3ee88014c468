use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// Header carrying the caller id set by the authenticating gateway.
pub const OWNER_HEADER: &str = "x-user-id";

/// Id of the user making the request. Every file lookup is scoped to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Owner(value.to_string()))
            .ok_or_else(|| AppError::Unauthorized("Missing user identity".to_string()))
    }
}
