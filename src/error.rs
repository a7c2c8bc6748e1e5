//! Error types for kinde-axum
//!
//! All errors in the crate are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//! Authentication-flow failures render a generic page so that provider
//! details never reach the browser.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

/// Reason a session cookie could not be decoded
///
/// Never escapes the session loader: a cookie that fails to decode is
/// treated as "no session".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionDecodeError {
    #[error("cookie is not valid base64")]
    Encoding,
    #[error("cookie is too short")]
    Truncated,
    #[error("cookie failed authentication")]
    Tampered,
    #[error("cookie payload is malformed")]
    Payload,
    #[error("session has expired")]
    Expired,
}

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or invalid configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Callback `state` absent or not equal to the stored one
    #[error("OAuth state mismatch")]
    StateMismatch,

    /// Provider redirected back with an `error` parameter
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Network or HTTP failure talking to the identity provider
    #[error("Identity provider exchange failed: {0}")]
    ProviderExchange(String),

    /// Session cookie could not be decoded
    #[error("Session decode error: {0}")]
    SessionDecode(#[from] SessionDecodeError),

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Encryption/decryption error (500)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::StateMismatch => "state_mismatch",
            AppError::AuthorizationDenied(_) => "authorization_denied",
            AppError::ProviderExchange(_) => "provider_exchange",
            AppError::SessionDecode(_) => "session_decode",
            AppError::Validation(_) => "validation",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::Encryption(_) => "encryption",
            AppError::Internal(_) => "internal",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::StateMismatch | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AuthorizationDenied(_) | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::SessionDecode(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::ProviderExchange(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Encryption(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether this error belongs to the browser-facing login flow
    fn is_flow_error(&self) -> bool {
        matches!(
            self,
            AppError::StateMismatch
                | AppError::AuthorizationDenied(_)
                | AppError::ProviderExchange(_)
        )
    }

    /// Message safe to show to a client
    fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::Unauthorized | AppError::Forbidden => self.to_string(),
            AppError::StateMismatch | AppError::AuthorizationDenied(_) => {
                "Authentication failed".to_string()
            }
            AppError::ProviderExchange(_) => "Authentication service unavailable".to_string(),
            AppError::SessionDecode(_) => "Authentication required".to_string(),
            AppError::Config(_) | AppError::Encryption(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Login-flow errors become a generic HTML page; everything else is a
    /// JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status();
        let kind = self.kind();

        if status.is_server_error() {
            tracing::error!(error = %self, kind, "Request failed");
        } else {
            tracing::debug!(error = %self, kind, "Request rejected");
        }

        crate::metrics::ERRORS_TOTAL.with_label_values(&[kind]).inc();

        let message = self.public_message();
        if self.is_flow_error() {
            return (status, Html(error_page(&message))).into_response();
        }

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

fn error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{message}</title></head>
<body>
    <h1>{message}</h1>
    <p>Please try signing in again.</p>
</body>
</html>
"#
    )
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
