//! Error type shared by the coordination services and the HTTP handlers.
//!
//! Client-facing messages stay generic for internal failures; the underlying
//! error is logged server-side.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum RippleError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("room has expired")]
    Expired,

    #[error("room is full")]
    Full,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid or expired session token")]
    InvalidToken,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("anonymous identity pool exhausted")]
    IdentityExhausted,

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RippleError>;

impl RippleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Expired | Self::Full | Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::IdentityExhausted | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Expired => "ROOM_EXPIRED",
            Self::Full => "ROOM_FULL",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::IdentityExhausted | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RippleError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(err) => {
                error!(error = ?err, "Request failed with an internal error");
                "An internal error occurred".to_string()
            }
            Self::IdentityExhausted => {
                error!("Anonymous identity pool exhausted for a room");
                "An internal error occurred".to_string()
            }
            Self::RateLimited => "Too many requests. Please wait before trying again.".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RippleError::NotFound("room").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(RippleError::Expired.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(RippleError::Full.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(RippleError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(RippleError::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            RippleError::IdentityExhausted.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_error_does_not_leak() {
        use http_body_util::BodyExt;

        let err = RippleError::Internal(anyhow::anyhow!("disk I/O error at /var/lib/ripple.db"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
        assert!(!json.to_string().contains("/var/lib"));
    }
}
