use super::server::ApiState;
use crate::{entity::UserId, error::Error};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;

/// The user id carried by a valid `Authorization: Bearer <token>` header.
#[derive(Debug, Clone, Copy)]
pub struct BearerUser(pub UserId);

#[async_trait]
impl FromRequestParts<Arc<ApiState>> for BearerUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value));

        state.manager.auth().verify(token).map(Self)
    }
}
