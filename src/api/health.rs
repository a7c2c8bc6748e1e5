use axum::{Json, extract::State};
use serde::Serialize;

use super::route_table;
use crate::AppState;
use crate::config::PublicConfig;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub config: PublicConfig,
    pub endpoints: Vec<String>,
}

/// GET {health}
///
/// Only mounted in debug mode. Never includes secrets.
pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        config: state.config.kinde.public(),
        endpoints: route_table(&state.config)
            .into_iter()
            .map(|(_, path)| path)
            .collect(),
    })
}
