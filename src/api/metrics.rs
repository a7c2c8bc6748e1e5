//! Prometheus scrape endpoint for the login flow counters

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, TextEncoder};

use crate::error::{AppError, Result};
use crate::metrics::REGISTRY;

/// GET {metrics}
///
/// Debug mode only. Counters change on every login, so the text is never
/// cached.
pub(super) async fn metrics_handler() -> Result<Response> {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut body)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        [
            (CONTENT_TYPE, encoder.format_type().to_string()),
            (CACHE_CONTROL, "no-store".to_string()),
        ],
        body,
    )
        .into_response())
}
