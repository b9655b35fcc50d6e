//! Caller identity extractor
//!
//! The upstream auth gateway authenticates the request and forwards the user
//! id in `x-user-id`. Requests without a well-formed id are rejected with 401.

use crate::identity::is_well_formed_user_id;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| is_well_formed_user_id(id));

        match user_id {
            Some(id) => Ok(AuthenticatedUser(id.to_string())),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "unauthorized",
                    "message": "Sign in to continue",
                })),
            )
                .into_response()),
        }
    }
}
