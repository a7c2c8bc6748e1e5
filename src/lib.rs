//! kinde-axum - Kinde authentication for Axum applications
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - login / register / callback / logout                     │
//! │  - access check, health, metrics                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Auth Layer                                │
//! │  - Flow coordinator (state, code exchange, refresh)         │
//! │  - Route guard and access policy                            │
//! │  - Encrypted cookie sessions                                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Identity Provider                           │
//! │  - Kinde OAuth2 endpoints and JWKS                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers and the endpoint table
//! - `auth`: Sessions, login flow, route guard and access policy
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus counters

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use auth::{AccessPolicy, FlowCoordinator, IdentityProvider, KindeClient, RouteGuard, SessionManager};

/// Application state shared across all handlers
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Session cookie codec
    pub sessions: Arc<SessionManager>,

    /// Login flow against the identity provider
    pub flow: FlowCoordinator,

    /// Navigation guard
    pub guard: Arc<RouteGuard>,

    /// Per-route permission rules
    pub access: Arc<AccessPolicy>,
}

impl AppState {
    /// Initialize application state against Kinde
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let provider = KindeClient::new(&config.kinde)?;
        tracing::info!(auth_domain = %config.kinde.auth_domain, "Kinde client initialized");

        Self::with_provider(config, Arc::new(provider))
    }

    /// Initialize application state with a custom identity provider
    pub fn with_provider(
        config: config::AppConfig,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, error::AppError> {
        config.validate()?;
        metrics::init_metrics();

        let sessions = SessionManager::from_config(&config.session)?;
        let flow = FlowCoordinator::new(provider, &config.kinde);
        let guard = RouteGuard::from_config(&config.guard, &config.endpoints);
        let access = AccessPolicy::from_config(&config.access, &config.endpoints.login);

        tracing::info!(
            guard_enabled = guard.is_enabled(),
            access_rules = config.access.rules.len(),
            debug = config.debug,
            "Application state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
            flow,
            guard: Arc::new(guard),
            access: Arc::new(access),
        })
    }
}

/// Build the Axum router: authentication endpoints merged with `app`.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState, app: Router<AppState>) -> Router {
    build_router_with(state, app, api::HandlerOverrides::default())
}

/// Like [`build_router`], with some endpoint handlers replaced
pub fn build_router_with(
    state: AppState,
    app: Router<AppState>,
    overrides: api::HandlerOverrides,
) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_seconds);

    let mut router = Router::new()
        .merge(api::auth_router(&state.config, overrides))
        .merge(app);

    if state.guard.is_enabled() || !state.access.is_empty() {
        router = router.layer(middleware::from_fn_with_state(
            state.clone(),
            auth::route_guard,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http().make_span_with(
                        |request: &axum::http::Request<axum::body::Body>| {
                            let request_id = request
                                .headers()
                                .get("x-request-id")
                                .and_then(|value| value.to_str().ok())
                                .unwrap_or("-");
                            tracing::info_span!(
                                "http_request",
                                method = %request.method(),
                                path = %request.uri().path(),
                                request_id = %request_id,
                            )
                        },
                    ),
                )
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(state)
}
