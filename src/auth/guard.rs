//! Route guard
//!
//! Pure navigation decisions: the middleware feeds in the request path and
//! whether the session holds a usable token.

use super::flow::POST_LOGIN_REDIRECT_PARAM;
use super::route_pattern::RoutePattern;
use crate::config::{EndpointsConfig, GuardConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Protected route without a session
    RedirectToLogin { location: String },
    /// Logged-out-only route with a session
    RedirectToLanding { location: String },
}

impl GuardDecision {
    pub fn label(&self) -> &'static str {
        match self {
            GuardDecision::Allow => "allow",
            GuardDecision::RedirectToLogin { .. } => "login",
            GuardDecision::RedirectToLanding { .. } => "landing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    enabled: bool,
    protected: Vec<RoutePattern>,
    logged_out_only: Vec<RoutePattern>,
    landing: String,
    login_path: String,
}

impl RouteGuard {
    pub fn from_config(guard: &GuardConfig, endpoints: &EndpointsConfig) -> Self {
        Self {
            enabled: guard.enabled,
            protected: guard.protected.iter().map(|p| RoutePattern::parse(p)).collect(),
            logged_out_only: guard
                .logged_out_only
                .iter()
                .map(|p| RoutePattern::parse(p))
                .collect(),
            landing: guard.logged_in_landing.clone(),
            login_path: endpoints.login.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the guard has an opinion about `path`
    pub fn applies_to(&self, path: &str) -> bool {
        self.enabled && (self.is_protected(path) || self.is_logged_out_only(path))
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.protected.iter().any(|p| p.matches(path))
    }

    pub fn is_logged_out_only(&self, path: &str) -> bool {
        self.logged_out_only.iter().any(|p| p.matches(path))
    }

    /// Decide what to do with a navigation to `path_and_query`
    pub fn evaluate(&self, path_and_query: &str, authenticated: bool) -> GuardDecision {
        if !self.enabled {
            return GuardDecision::Allow;
        }

        if !authenticated && self.is_protected(path_and_query) {
            return GuardDecision::RedirectToLogin {
                location: login_location(&self.login_path, path_and_query),
            };
        }

        if authenticated && self.is_logged_out_only(path_and_query) {
            return GuardDecision::RedirectToLanding {
                location: self.landing.clone(),
            };
        }

        GuardDecision::Allow
    }
}

/// Login URL that brings the user back to `destination` afterwards
pub fn login_location(login_path: &str, destination: &str) -> String {
    format!(
        "{login_path}?{POST_LOGIN_REDIRECT_PARAM}={}",
        urlencoding::encode(destination)
    )
}
