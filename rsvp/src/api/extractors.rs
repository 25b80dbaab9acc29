//! Request extractors.

use super::error::ApiError;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use rsvp_core::{IdentityProvider, UserId};
use std::sync::Arc;

/// Bearer token extracted from `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization format. Expected 'Bearer <token>'"))?;

        if token.is_empty() {
            return Err(ApiError::unauthorized("Empty bearer token"));
        }
        Ok(Self(token.to_string()))
    }
}

/// The acting user, resolved from the bearer token.
///
/// Rejects with 401 when the header is missing or the token is unknown.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    Arc<dyn IdentityProvider>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let identity = Arc::<dyn IdentityProvider>::from_ref(state);

        identity
            .resolve(&token)
            .await?
            .map(Self)
            .ok_or_else(|| ApiError::unauthorized("Unknown or expired token"))
    }
}
