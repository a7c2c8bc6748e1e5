//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{Router, async_trait, routing::get};
use kinde_axum::auth::provider::AuthorizationRequest;
use kinde_axum::auth::{CurrentUser, IdentityProvider, ProviderError, TokenClaims, TokenSet};
use kinde_axum::config::{self, Secret};
use kinde_axum::{AppState, api::HandlerOverrides};
use tokio::net::TcpListener;
use url::Url;

pub const AUTH_DOMAIN: &str = "https://acme.kinde.test";

/// Identity provider that never leaves the process
///
/// An authorization code names the user's permissions joined by `,`
/// (e.g. `admin,user`); the code `rejected` fails the exchange. Access
/// tokens look like `access-<code>`.
pub struct FakeProvider {
    pub refreshes: AtomicUsize,
    pub expires_in: i64,
    pub exchange_delay: Option<Duration>,
}

impl FakeProvider {
    pub fn new(expires_in: i64) -> Self {
        Self {
            refreshes: AtomicUsize::new(0),
            expires_in,
            exchange_delay: None,
        }
    }

    /// Make every code exchange hang for `delay` before answering
    pub fn with_exchange_delay(mut self, delay: Duration) -> Self {
        self.exchange_delay = Some(delay);
        self
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn tokens(code: &str, expires_in: i64) -> TokenSet {
        serde_json::from_value(serde_json::json!({
            "access_token": format!("access-{code}"),
            "refresh_token": format!("refresh-{code}"),
            "id_token": format!("id-{code}"),
            "expires_in": expires_in,
        }))
        .unwrap()
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<Url, ProviderError> {
        let mut url = Url::parse(AUTH_DOMAIN).unwrap().join("/oauth2/auth").unwrap();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", "test-client")
                .append_pair("state", &request.state);
            if request.intent == kinde_axum::auth::LoginIntent::Register {
                query.append_pair("prompt", "create");
            }
            for (key, value) in &request.extra_params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError> {
        if let Some(delay) = self.exchange_delay {
            tokio::time::sleep(delay).await;
        }
        if code == "rejected" {
            return Err(ProviderError::Rejected {
                status: 400,
                error: "invalid_grant".to_string(),
            });
        }
        Ok(Self::tokens(code, self.expires_in))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let code = refresh_token
            .strip_prefix("refresh-")
            .ok_or_else(|| ProviderError::InvalidToken("unknown refresh token".to_string()))?;
        Ok(Self::tokens(code, 3600))
    }

    async fn validate_token(&self, access_token: &str) -> Result<TokenClaims, ProviderError> {
        let code = access_token
            .strip_prefix("access-")
            .ok_or_else(|| ProviderError::InvalidToken("unknown access token".to_string()))?;
        Ok(TokenClaims {
            sub: "kp_test".to_string(),
            permissions: code.split(',').map(ToOwned::to_owned).collect(),
            exp: chrono::Utc::now().timestamp() + 3600,
            org_code: None,
        })
    }

    fn logout_url(&self) -> Url {
        let mut url = Url::parse(AUTH_DOMAIN).unwrap().join("/logout").unwrap();
        url.query_pairs_mut()
            .append_pair("redirect", "http://localhost:3000");
        url
    }
}

/// Configuration every test starts from
pub fn test_config() -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            request_timeout_seconds: 5,
        },
        kinde: config::KindeConfig {
            auth_domain: AUTH_DOMAIN.to_string(),
            client_id: "test-client".to_string(),
            client_secret: Secret::new("test-client-secret"),
            redirect_url: "http://localhost:3000/api/callback".to_string(),
            logout_redirect_url: "http://localhost:3000".to_string(),
            post_login_redirect_url: Some("/dashboard".to_string()),
            audience: None,
            scope: "openid profile email offline".to_string(),
            http_timeout_seconds: 5,
        },
        session: config::SessionConfig {
            password: Secret::new("test-session-password-32-bytes!!"),
            max_age_seconds: 3600,
            cookie: config::CookieConfig {
                name: "kinde_session".to_string(),
                path: "/".to_string(),
                same_site: config::SameSitePolicy::Lax,
                secure: false,
                http_only: true,
            },
        },
        endpoints: config::EndpointsConfig::default(),
        guard: config::GuardConfig {
            enabled: true,
            protected: vec!["/dashboard/**".to_string()],
            logged_out_only: vec!["/welcome".to_string()],
            logged_in_landing: "/dashboard".to_string(),
        },
        access: config::AccessConfig::default(),
        debug: false,
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub provider: Arc<FakeProvider>,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: config::AppConfig) -> Self {
        Self::build(config, FakeProvider::new(3600), HandlerOverrides::default()).await
    }

    pub async fn build(
        config: config::AppConfig,
        provider: FakeProvider,
        overrides: HandlerOverrides,
    ) -> Self {
        let provider = Arc::new(provider);
        let state = AppState::with_provider(config, provider.clone()).unwrap();

        // Redirects are asserted on, never followed
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = kinde_axum::build_router_with(state.clone(), app_routes(), overrides);

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            provider,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(cookie) = cookie {
            request = request.header("cookie", cookie);
        }
        request.send().await.unwrap()
    }

    /// Start a login and return (session cookie, provider URL)
    pub async fn begin_login(&self, query: &str) -> (String, Url) {
        let response = self.get(&format!("/api/login{query}"), None).await;
        assert_eq!(response.status(), 303);
        let cookie = session_cookie(&response).expect("login sets the session cookie");
        let location = Url::parse(&location(&response)).unwrap();
        (cookie, location)
    }

    /// Run the whole login flow for a user with the given permissions
    ///
    /// Returns the authenticated session cookie.
    pub async fn sign_in(&self, permissions: &str) -> String {
        let (cookie, provider_url) = self.begin_login("").await;
        let state = query_param(&provider_url, "state").unwrap();

        let response = self
            .get(
                &format!("/api/callback?code={permissions}&state={state}"),
                Some(&cookie),
            )
            .await;
        assert_eq!(response.status(), 303);
        session_cookie(&response).expect("callback sets the session cookie")
    }
}

/// Host application routes used across the suite
fn app_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { "home" }))
        .route("/welcome", get(|| async { "welcome" }))
        .route("/dashboard", get(|| async { "dashboard" }))
        .route("/dashboard/reports", get(|| async { "reports" }))
        .route("/admin/panel", get(|| async { "admin panel" }))
        .route(
            "/me",
            get(|CurrentUser(token): CurrentUser| async move { token.access_token().to_string() }),
        )
}

/// `name=value` of the session cookie set by a response
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("kinde_session="))
        .and_then(|value| value.split(';').next())
        .map(ToOwned::to_owned)
}

/// Whether the response removes the session cookie
pub fn clears_session(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with("kinde_session=;") && value.contains("Max-Age=0"))
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
