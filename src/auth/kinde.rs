//! Kinde implementation of [`IdentityProvider`]
//!
//! Endpoints used, relative to the business domain:
//! - `/oauth2/auth` (browser redirect)
//! - `/oauth2/token` (code exchange and refresh)
//! - `/.well-known/jwks` (access token signing keys)
//! - `/logout`

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tokio::sync::RwLock;
use url::Url;

use super::provider::{
    AuthorizationRequest, IdentityProvider, LoginIntent, ProviderError, TokenClaims, TokenSet,
};
use crate::config::{KindeConfig, Secret};
use crate::error::AppError;

const JWKS_TTL: Duration = Duration::from_secs(3600);
const SDK_HEADER: HeaderName = HeaderName::from_static("kinde-sdk");

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// OAuth2 client for a Kinde business domain
///
/// Created once at startup and shared by every request.
pub struct KindeClient {
    http: reqwest::Client,
    domain: Url,
    issuer: String,
    client_id: String,
    client_secret: Secret,
    redirect_url: String,
    logout_redirect_url: String,
    scope: String,
    audience: Option<String>,
    jwks: RwLock<Option<CachedJwks>>,
}

/// Error body of a failed token request
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
}

impl KindeClient {
    /// Build a client from validated configuration
    pub fn new(config: &KindeConfig) -> Result<Self, AppError> {
        let domain = Url::parse(config.auth_domain.trim())
            .map_err(|e| AppError::Config(format!("kinde.auth_domain: {e}")))?;

        let mut headers = HeaderMap::new();
        let sdk = format!("Rust-Axum/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(
            SDK_HEADER,
            HeaderValue::from_str(&sdk).map_err(|e| AppError::Internal(e.into()))?,
        );

        let http = reqwest::Client::builder()
            .user_agent(concat!("kinde-axum/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            http,
            issuer: config.auth_domain.trim().trim_end_matches('/').to_string(),
            domain,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            logout_redirect_url: config.logout_redirect_url.clone(),
            scope: config.scope.clone(),
            audience: config.audience().map(ToOwned::to_owned),
            jwks: RwLock::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.domain
            .join(path)
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid endpoint {path}: {e}")))
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenSet, ProviderError> {
        let response = self
            .http
            .post(self.endpoint("/oauth2/token")?)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = response
                .json::<OAuthErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| "unknown_error".to_string());
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                error,
            });
        }

        response
            .json::<TokenSet>()
            .await
            .map_err(|_| ProviderError::InvalidResponse("token response is not valid JSON".into()))
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, ProviderError> {
        let response = self
            .http
            .get(self.endpoint("/.well-known/jwks")?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                error: "jwks_unavailable".to_string(),
            });
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|_| ProviderError::InvalidResponse("JWKS is not valid JSON".into()))
    }

    /// Signing key for `kid`, fetching the key set when stale or forced
    async fn decoding_key(
        &self,
        kid: &str,
        force_refresh: bool,
    ) -> Result<Option<DecodingKey>, ProviderError> {
        if !force_refresh {
            let cache = self.jwks.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_TTL {
                    return key_from_set(&cached.keys, kid);
                }
            }
        }

        let keys = self.fetch_jwks().await?;
        let key = key_from_set(&keys, kid);
        *self.jwks.write().await = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });
        tracing::debug!(force_refresh, "Kinde JWKS refreshed");
        key
    }
}

fn key_from_set(keys: &JwkSet, kid: &str) -> Result<Option<DecodingKey>, ProviderError> {
    keys.find(kid)
        .map(|jwk| {
            DecodingKey::from_jwk(jwk)
                .map_err(|e| ProviderError::InvalidResponse(format!("unusable JWK {kid}: {e}")))
        })
        .transpose()
}

#[async_trait]
impl IdentityProvider for KindeClient {
    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<Url, ProviderError> {
        let mut url = self.endpoint("/oauth2/auth")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &self.redirect_url)
                .append_pair("scope", &self.scope)
                .append_pair("state", &request.state);

            if let Some(audience) = request.audience.as_deref().or(self.audience.as_deref()) {
                query.append_pair("audience", audience);
            }
            if request.intent == LoginIntent::Register {
                query.append_pair("prompt", "create");
            }
            for (key, value) in &request.extra_params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose()),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose()),
        ])
        .await
    }

    async fn validate_token(&self, access_token: &str) -> Result<TokenClaims, ProviderError> {
        let header = decode_header(access_token)
            .map_err(|e| ProviderError::InvalidToken(format!("bad header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| ProviderError::InvalidToken("missing kid".to_string()))?;

        // An unknown kid may mean the keys were rotated: refetch once.
        let key = match self.decoding_key(&kid, false).await? {
            Some(key) => key,
            None => self
                .decoding_key(&kid, true)
                .await?
                .ok_or_else(|| ProviderError::InvalidToken(format!("unknown kid {kid}")))?,
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        decode::<TokenClaims>(access_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| ProviderError::InvalidToken(e.to_string()))
    }

    fn logout_url(&self) -> Url {
        let mut url = self
            .domain
            .join("/logout")
            .unwrap_or_else(|_| self.domain.clone());
        url.query_pairs_mut()
            .append_pair("redirect", &self.logout_redirect_url);
        url
    }
}

/// Parameters Kinde understands on the authorization URL besides the
/// ones this client sets itself
pub fn is_reserved_param(name: &str) -> bool {
    const RESERVED: [&str; 6] = [
        "client_id",
        "response_type",
        "redirect_uri",
        "state",
        "scope",
        "post_login_redirect_url",
    ];
    RESERVED.contains(&name)
}

/// Collect passthrough parameters, dropping reserved ones
pub fn passthrough_params<I>(params: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    params
        .into_iter()
        .filter(|(name, _)| {
            let reserved = is_reserved_param(name);
            if reserved {
                tracing::debug!(param = %name, "Ignoring reserved authorization parameter");
            }
            !reserved
        })
        .collect()
}
