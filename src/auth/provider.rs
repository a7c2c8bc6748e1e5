//! Identity provider collaborator
//!
//! The flow coordinator talks to the provider only through
//! [`IdentityProvider`], so handlers can be exercised against a fake.

use std::collections::BTreeMap;
use std::fmt;

use axum::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Why the user is being sent to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginIntent {
    Login,
    Register,
}

impl LoginIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginIntent::Login => "login",
            LoginIntent::Register => "register",
        }
    }
}

/// Everything needed to build an authorization URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub state: String,
    pub intent: LoginIntent,
    pub audience: Option<String>,
    /// Extra query parameters forwarded verbatim (org_code, login_hint, ...)
    pub extra_params: BTreeMap<String, String>,
}

/// Tokens returned by the token endpoint
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Verified claims of an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
    #[serde(default)]
    pub org_code: Option<String>,
}

/// Provider failures
///
/// Messages carry status codes and error identifiers, never token or
/// secret values.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider rejected the request with status {status}: {error}")]
    Rejected { status: u16, error: String },
    #[error("provider response could not be parsed: {0}")]
    InvalidResponse(String),
    #[error("token is invalid: {0}")]
    InvalidToken(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest errors may embed the request URL; keep only the kind.
        let kind = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "connection failed"
        } else if err.is_decode() {
            "response body could not be decoded"
        } else {
            "transport error"
        };
        ProviderError::Transport(kind.to_string())
    }
}

impl From<ProviderError> for crate::error::AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidToken(_) => crate::error::AppError::Unauthorized,
            other => crate::error::AppError::ProviderExchange(other.to_string()),
        }
    }
}

/// OAuth2/OIDC operations the coordinator relies on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the browser is sent to in order to sign in
    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<Url, ProviderError>;

    /// Exchange an authorization code for tokens
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError>;

    /// Obtain fresh tokens from a refresh token
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;

    /// Verify an access token and return its claims
    async fn validate_token(&self, access_token: &str) -> Result<TokenClaims, ProviderError>;

    /// URL that ends the provider-side session
    fn logout_url(&self) -> Url;
}
