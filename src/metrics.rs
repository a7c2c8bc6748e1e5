//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Flow Metrics
    pub static ref LOGINS_STARTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kinde_logins_started_total", "Total number of login flows started"),
        &["intent"]
    ).expect("metric can be created");
    pub static ref CALLBACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kinde_callbacks_total", "Total number of OAuth callbacks processed"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref TOKEN_REFRESHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kinde_token_refreshes_total", "Total number of access token refreshes"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref LOGOUTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kinde_logouts_total", "Total number of logouts"),
        &["had_session"]
    ).expect("metric can be created");

    // Guard Metrics
    pub static ref GUARD_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kinde_guard_decisions_total", "Route guard decisions"),
        &["decision"]
    ).expect("metric can be created");
    pub static ref ACCESS_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kinde_access_decisions_total", "Access policy decisions"),
        &["decision"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kinde_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; registration happens on the first call.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(LOGINS_STARTED_TOTAL.clone()))
            .expect("LOGINS_STARTED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CALLBACKS_TOTAL.clone()))
            .expect("CALLBACKS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(TOKEN_REFRESHES_TOTAL.clone()))
            .expect("TOKEN_REFRESHES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(LOGOUTS_TOTAL.clone()))
            .expect("LOGOUTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(GUARD_DECISIONS_TOTAL.clone()))
            .expect("GUARD_DECISIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ACCESS_DECISIONS_TOTAL.clone()))
            .expect("ACCESS_DECISIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
