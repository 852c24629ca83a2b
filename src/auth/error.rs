//! OAuth protocol errors (RFC 6749 §5.2, RFC 6750 §3.1)

use crate::PressGateError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Protocol-level error raised by the authorization or resource server
///
/// `error_type` is the RFC error code (`invalid_grant`, `invalid_token`, ...).
/// The token validator turns it into an `oauth_<error_type>` API error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error_type}: {description}")]
pub struct OAuthServerError {
    pub error_type: &'static str,
    pub description: String,
    pub status: u16,
}

impl OAuthServerError {
    fn new(error_type: &'static str, description: impl Into<String>, status: u16) -> Self {
        Self {
            error_type,
            description: description.into(),
            status,
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new("invalid_request", description, 400)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new("invalid_client", description, 401)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new("invalid_grant", description, 400)
    }

    pub fn unsupported_grant_type(grant_type: &str) -> Self {
        Self::new(
            "unsupported_grant_type",
            format!("The authorization grant type '{}' is not supported", grant_type),
            400,
        )
    }

    pub fn invalid_scope(scope: &str) -> Self {
        Self::new(
            "invalid_scope",
            format!("The requested scope '{}' is invalid or unknown", scope),
            400,
        )
    }

    pub fn unsupported_response_type(response_type: &str) -> Self {
        Self::new(
            "unsupported_response_type",
            format!("The response type '{}' is not supported", response_type),
            400,
        )
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new("access_denied", description, 401)
    }

    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::new("invalid_token", description, 401)
    }

    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new("server_error", description, 500)
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_REQUEST)
    }

    /// Whether the error was caused by something other than the request
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

impl From<PressGateError> for OAuthServerError {
    fn from(err: PressGateError) -> Self {
        tracing::error!(error = %err, "OAuth server failure");
        OAuthServerError::server_error("The authorization server encountered an unexpected error")
    }
}

impl IntoResponse for OAuthServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.error_type,
            "error_description": self.description,
        });

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if self.error_type == "invalid_client" {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"OAuth\""),
            );
        }
        response
    }
}
