//! Login flow coordination
//!
//! Implements the OAuth 2.0 authorization code flow against an
//! [`IdentityProvider`]:
//! 1. `begin_login` stores a fresh state and builds the authorization URL
//! 2. `complete_callback` checks the state and exchanges the code
//! 3. `logout` clears the session and returns the provider logout URL

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;
use url::{Origin, Url};

use super::kinde::passthrough_params;
use super::provider::{AuthorizationRequest, IdentityProvider, LoginIntent, TokenClaims, TokenSet};
use super::session::{
    ACCESS_TOKEN, EXPIRES_AT, ID_TOKEN, OAUTH_STATE, POST_LOGIN_REDIRECT, REFRESH_TOKEN, Session,
};
use crate::config::KindeConfig;
use crate::error::AppError;
use crate::metrics::{CALLBACKS_TOTAL, LOGINS_STARTED_TOTAL, LOGOUTS_TOTAL, TOKEN_REFRESHES_TOTAL};

/// Bytes of entropy in each state value
const STATE_BYTES: usize = 32;
/// Tokens this close to expiry are treated as expired
const EXPIRY_LEEWAY_SECONDS: i64 = 10;
/// Query parameter carrying the post-login destination
pub const POST_LOGIN_REDIRECT_PARAM: &str = "post_login_redirect_url";
/// Camel-case spelling used by the Kinde JavaScript SDKs
pub const POST_LOGIN_REDIRECT_PARAM_CAMEL: &str = "postLoginRedirectURL";

/// Parameters of a login or register request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginParams {
    pub intent: LoginIntent,
    pub post_login_redirect: Option<String>,
    pub extra_params: BTreeMap<String, String>,
}

impl LoginParams {
    /// Split raw query parameters into the redirect target and passthrough
    pub fn from_query(intent: LoginIntent, mut query: BTreeMap<String, String>) -> Self {
        let snake = query.remove(POST_LOGIN_REDIRECT_PARAM);
        let camel = query.remove(POST_LOGIN_REDIRECT_PARAM_CAMEL);
        let post_login_redirect = snake
            .into_iter()
            .chain(camel)
            .find(|value| !value.trim().is_empty());

        Self {
            intent,
            post_login_redirect,
            extra_params: passthrough_params(query),
        }
    }
}

/// Query string the provider appends to the callback URL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of a successful callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub redirect_to: String,
}

/// The access token currently held by a session
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSnapshot {
    access_token: String,
    pub expires_at: Option<i64>,
}

impl TokenSnapshot {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for TokenSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSnapshot")
            .field("access_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Drives login, callback and logout
#[derive(Clone)]
pub struct FlowCoordinator {
    provider: Arc<dyn IdentityProvider>,
    audience: Option<String>,
    post_login_fallback: String,
    allowed_origins: Vec<Origin>,
}

impl FlowCoordinator {
    pub fn new(provider: Arc<dyn IdentityProvider>, config: &KindeConfig) -> Self {
        let allowed_origins = [&config.redirect_url, &config.logout_redirect_url]
            .into_iter()
            .filter_map(|value| Url::parse(value).ok())
            .map(|url| url.origin())
            .collect();

        Self {
            provider,
            audience: config.audience().map(ToOwned::to_owned),
            post_login_fallback: config
                .post_login_redirect_url
                .clone()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "/".to_string()),
            allowed_origins,
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Start a login: store state and build the authorization URL
    ///
    /// # Errors
    /// `Validation` when the requested post-login target is off-site.
    pub fn begin_login(&self, session: &mut Session, params: LoginParams) -> Result<Url, AppError> {
        let target = params
            .post_login_redirect
            .as_deref()
            .map(|target| self.local_redirect(target))
            .transpose()?;

        let state = generate_state();
        let url = self.provider.authorization_url(&AuthorizationRequest {
            state: state.clone(),
            intent: params.intent,
            audience: self.audience.clone(),
            extra_params: params.extra_params,
        })?;

        session.set(OAUTH_STATE, state);
        match target {
            Some(target) => session.set(POST_LOGIN_REDIRECT, target),
            None => {
                session.remove(POST_LOGIN_REDIRECT);
            }
        }

        LOGINS_STARTED_TOTAL
            .with_label_values(&[params.intent.as_str()])
            .inc();
        tracing::info!(
            session_id = %session.id(),
            intent = params.intent.as_str(),
            "Login flow started"
        );

        Ok(url)
    }

    /// Finish a login from the provider's callback
    ///
    /// The pending state and redirect target are consumed whatever the
    /// outcome, and tokens are written only after a successful exchange.
    pub async fn complete_callback(
        &self,
        session: &mut Session,
        query: CallbackQuery,
    ) -> Result<CallbackOutcome, AppError> {
        let expected_state = session.take_str(OAUTH_STATE);
        let pending_redirect = session.take_str(POST_LOGIN_REDIRECT);

        let tokens = match self.exchange(expected_state, query).await {
            Ok(tokens) => tokens,
            Err(error) => {
                CALLBACKS_TOTAL.with_label_values(&[error.kind()]).inc();
                tracing::warn!(
                    session_id = %session.id(),
                    kind = error.kind(),
                    "Login callback rejected"
                );
                return Err(error);
            }
        };

        session.rotate_id();
        store_tokens(session, &tokens);

        CALLBACKS_TOTAL.with_label_values(&["success"]).inc();
        tracing::info!(session_id = %session.id(), "Login completed");

        Ok(CallbackOutcome {
            redirect_to: pending_redirect.unwrap_or_else(|| self.post_login_fallback.clone()),
        })
    }

    async fn exchange(
        &self,
        expected_state: Option<String>,
        query: CallbackQuery,
    ) -> Result<TokenSet, AppError> {
        match (expected_state.as_deref(), query.state.as_deref()) {
            (Some(expected), Some(received)) if expected == received => {}
            _ => return Err(AppError::StateMismatch),
        }

        if let Some(error) = query.error {
            return Err(AppError::AuthorizationDenied(error));
        }

        let code = query
            .code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| AppError::Validation("missing authorization code".to_string()))?;

        let tokens = self.provider.exchange_code(&code).await?;
        if tokens.access_token.is_empty() {
            return Err(AppError::ProviderExchange(
                "token response has an empty access token".to_string(),
            ));
        }
        Ok(tokens)
    }

    /// Clear the session and return the provider logout URL
    ///
    /// Succeeds on an already-empty session.
    pub fn logout(&self, session: &mut Session) -> Url {
        let had_session = !session.is_empty();
        session.clear();

        LOGOUTS_TOTAL
            .with_label_values(&[if had_session { "true" } else { "false" }])
            .inc();
        tracing::info!(session_id = %session.id(), had_session, "Logged out");

        self.provider.logout_url()
    }

    /// Current access token, refreshing it once if it has expired
    ///
    /// Returns `None` (and drops the tokens) when there is no usable token.
    pub async fn authenticated(&self, session: &mut Session) -> Option<TokenSnapshot> {
        let access_token = session.get_str(ACCESS_TOKEN)?.to_string();
        let expires_at = session.get(EXPIRES_AT).and_then(Value::as_i64);

        let now = Utc::now().timestamp();
        if expires_at.is_none_or(|exp| exp > now + EXPIRY_LEEWAY_SECONDS) {
            return Some(TokenSnapshot {
                access_token,
                expires_at,
            });
        }

        let Some(refresh_token) = session.get_str(REFRESH_TOKEN).map(ToOwned::to_owned) else {
            tracing::debug!(session_id = %session.id(), "Access token expired");
            clear_tokens(session);
            return None;
        };

        match self.provider.refresh_token(&refresh_token).await {
            Ok(tokens) if !tokens.access_token.is_empty() => {
                store_tokens(session, &tokens);
                TOKEN_REFRESHES_TOTAL.with_label_values(&["success"]).inc();
                tracing::debug!(session_id = %session.id(), "Access token refreshed");
                Some(TokenSnapshot {
                    access_token: tokens.access_token,
                    expires_at: session.get(EXPIRES_AT).and_then(Value::as_i64),
                })
            }
            Ok(_) | Err(_) => {
                TOKEN_REFRESHES_TOTAL.with_label_values(&["failure"]).inc();
                tracing::warn!(session_id = %session.id(), "Access token refresh failed");
                clear_tokens(session);
                None
            }
        }
    }

    /// Verified claims of the session's access token
    ///
    /// An invalid token is dropped from the session.
    pub async fn claims(&self, session: &mut Session) -> Option<TokenClaims> {
        let snapshot = self.authenticated(session).await?;
        match self.provider.validate_token(snapshot.access_token()).await {
            Ok(claims) => Some(claims),
            Err(error) => {
                tracing::warn!(session_id = %session.id(), %error, "Access token rejected");
                clear_tokens(session);
                None
            }
        }
    }

    /// Permissions granted by the session's verified access token
    ///
    /// `None` when the session is not authenticated.
    pub async fn granted_permissions(&self, session: &mut Session) -> Option<Vec<String>> {
        self.claims(session).await.map(|claims| claims.permissions)
    }

    /// Accept local paths and URLs on the application's own origins
    fn local_redirect(&self, target: &str) -> Result<String, AppError> {
        let target = target.trim();
        if target.starts_with('/') && !target.starts_with("//") && !target.contains('\\') {
            return Ok(target.to_string());
        }

        match Url::parse(target) {
            Ok(url) if self.allowed_origins.contains(&url.origin()) => Ok(url.to_string()),
            _ => Err(AppError::Validation(
                "post-login redirect must stay on this site".to_string(),
            )),
        }
    }
}

/// Fresh anti-forgery state: 256 random bits, base64url encoded
pub fn generate_state() -> String {
    let mut bytes = [0_u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn store_tokens(session: &mut Session, tokens: &TokenSet) {
    session.set(ACCESS_TOKEN, tokens.access_token.clone());

    match &tokens.refresh_token {
        Some(refresh) => session.set(REFRESH_TOKEN, refresh.clone()),
        None => {
            session.remove(REFRESH_TOKEN);
        }
    }
    match &tokens.id_token {
        Some(id_token) => session.set(ID_TOKEN, id_token.clone()),
        None => {
            session.remove(ID_TOKEN);
        }
    }
    match tokens
        .expires_in
        .and_then(|seconds| Utc::now().timestamp().checked_add(seconds))
    {
        Some(expires_at) => session.set(EXPIRES_AT, expires_at),
        None => {
            session.remove(EXPIRES_AT);
        }
    }
}

fn clear_tokens(session: &mut Session) {
    for key in [ACCESS_TOKEN, REFRESH_TOKEN, ID_TOKEN, EXPIRES_AT] {
        session.remove(key);
    }
}
