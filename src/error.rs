//! Server-side error taxonomy.
//!
//! Services return [`Error`]; the HTTP layer turns it into a status code and a
//! `{"message": ...}` body. Upstream and internal failures are logged in full
//! here and reach the client only as a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// A unique field (username, email) is already taken.
    #[error("{0}")]
    Conflict(String),

    /// The password does not match the stored hash.
    #[error("Invalid credentials.")]
    InvalidCredential,

    /// Bearer token missing, malformed or expired.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated, but not the owner of the resource.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// The completion service failed or returned garbage.
    #[error("completion service failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Conflict(_) | Error::InvalidCredential => {
                StatusCode::BAD_REQUEST
            }
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Upstream(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to a client.
    pub fn public_message(&self) -> String {
        match self {
            Error::Upstream(_) => "Server error. Please try again later.".to_string(),
            Error::Internal(_) => "Server error. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Upstream(detail) => error!(error = %detail, "completion request failed"),
            Error::Internal(err) => error!(error = ?err, "request failed with internal error"),
            _ => {}
        }

        let body = Json(json!({ "message": self.public_message() }));
        (self.status(), body).into_response()
    }
}
