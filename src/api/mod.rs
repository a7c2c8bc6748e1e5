//! API layer
//!
//! HTTP handlers for:
//! - Login, register, callback and logout
//! - Access checks for client-side navigation
//! - Health and metrics (debug only)
//!
//! Which endpoints exist is decided by [`Endpoint::is_registered`], a pure
//! function of the configuration.

mod access;
mod auth;
mod health;
mod metrics;

use std::collections::HashMap;

use axum::Router;
use axum::routing::{MethodRouter, get, post};

use crate::AppState;
use crate::config::AppConfig;

pub use access::{AccessRequest, AccessResponse};
pub use health::HealthResponse;

/// Endpoints this crate can mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Login,
    Register,
    Callback,
    Logout,
    Health,
    Access,
    Metrics,
}

impl Endpoint {
    pub const ALL: [Endpoint; 7] = [
        Endpoint::Login,
        Endpoint::Register,
        Endpoint::Callback,
        Endpoint::Logout,
        Endpoint::Health,
        Endpoint::Access,
        Endpoint::Metrics,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Login => "login",
            Endpoint::Register => "register",
            Endpoint::Callback => "callback",
            Endpoint::Logout => "logout",
            Endpoint::Health => "health",
            Endpoint::Access => "access",
            Endpoint::Metrics => "metrics",
        }
    }

    /// Configured path of the endpoint
    pub fn path(self, config: &AppConfig) -> &str {
        let endpoints = &config.endpoints;
        match self {
            Endpoint::Login => &endpoints.login,
            Endpoint::Register => &endpoints.register,
            Endpoint::Callback => &endpoints.callback,
            Endpoint::Logout => &endpoints.logout,
            Endpoint::Health => &endpoints.health,
            Endpoint::Access => &endpoints.access,
            Endpoint::Metrics => &endpoints.metrics,
        }
    }

    /// Whether the endpoint is mounted under `config`
    ///
    /// Health and metrics expose internals and only exist in debug mode.
    /// The access check only exists when access rules are configured.
    pub fn is_registered(self, config: &AppConfig) -> bool {
        match self {
            Endpoint::Login | Endpoint::Register | Endpoint::Callback | Endpoint::Logout => true,
            Endpoint::Health | Endpoint::Metrics => config.debug,
            Endpoint::Access => !config.access.rules.is_empty(),
        }
    }

    fn default_handler(self) -> MethodRouter<AppState> {
        match self {
            Endpoint::Login => get(auth::login),
            Endpoint::Register => get(auth::register),
            Endpoint::Callback => get(auth::callback),
            Endpoint::Logout => get(auth::logout),
            Endpoint::Health => get(health::health),
            Endpoint::Access => post(access::check_access),
            Endpoint::Metrics => get(metrics::metrics_handler),
        }
    }
}

/// Registered endpoints and their paths, in mount order
pub fn route_table(config: &AppConfig) -> Vec<(Endpoint, String)> {
    Endpoint::ALL
        .into_iter()
        .filter(|endpoint| endpoint.is_registered(config))
        .map(|endpoint| (endpoint, endpoint.path(config).to_string()))
        .collect()
}

/// Host-supplied handlers replacing the built-in ones
///
/// An override only takes effect for endpoints that are registered.
#[derive(Default)]
pub struct HandlerOverrides {
    handlers: HashMap<Endpoint, MethodRouter<AppState>>,
}

impl HandlerOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, endpoint: Endpoint, handler: MethodRouter<AppState>) -> Self {
        self.handlers.insert(endpoint, handler);
        self
    }
}

/// Create the authentication router
pub fn auth_router(config: &AppConfig, mut overrides: HandlerOverrides) -> Router<AppState> {
    route_table(config)
        .into_iter()
        .fold(Router::new(), |router, (endpoint, path)| {
            let handler = overrides
                .handlers
                .remove(&endpoint)
                .unwrap_or_else(|| endpoint.default_handler());
            tracing::debug!(endpoint = endpoint.name(), %path, "Mounting endpoint");
            router.route(&path, handler)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use crate::config::AccessRuleConfig;

    fn registered(config: &AppConfig) -> Vec<Endpoint> {
        route_table(config).into_iter().map(|(e, _)| e).collect()
    }

    #[test]
    fn production_mounts_only_flow_endpoints() {
        let config = valid_config();
        assert_eq!(
            registered(&config),
            vec![
                Endpoint::Login,
                Endpoint::Register,
                Endpoint::Callback,
                Endpoint::Logout
            ]
        );
    }

    #[test]
    fn debug_mounts_health_and_metrics() {
        let mut config = valid_config();
        config.debug = true;
        let endpoints = registered(&config);
        assert!(endpoints.contains(&Endpoint::Health));
        assert!(endpoints.contains(&Endpoint::Metrics));
        assert!(!endpoints.contains(&Endpoint::Access));
    }

    #[test]
    fn access_rules_mount_access_endpoint() {
        let mut config = valid_config();
        config.access.rules.push(AccessRuleConfig {
            route: "/admin/**".to_string(),
            permissions: vec!["admin".to_string()],
            redirect_url: "/".to_string(),
        });
        assert!(registered(&config).contains(&Endpoint::Access));
    }

    #[test]
    fn paths_follow_configuration() {
        let mut config = valid_config();
        config.endpoints.login = "/auth/sign-in".to_string();
        let table = route_table(&config);
        assert_eq!(table[0], (Endpoint::Login, "/auth/sign-in".to_string()));
    }
}
