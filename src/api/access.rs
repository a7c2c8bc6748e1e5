//! Access check for client-side navigation

use axum::{Json, extract::State};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::AccessDecision;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct AccessRequest {
    /// Path (query string allowed) the client wants to navigate to
    pub route: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessResponse {
    pub allowed: bool,
    /// Where to send the user instead, when not allowed
    pub redirect_url: Option<String>,
}

impl From<AccessDecision> for AccessResponse {
    fn from(decision: AccessDecision) -> Self {
        match decision {
            AccessDecision::Allow => Self {
                allowed: true,
                redirect_url: None,
            },
            AccessDecision::Deny { redirect_url } => Self {
                allowed: false,
                redirect_url: Some(redirect_url),
            },
            AccessDecision::Login { location } => Self {
                allowed: false,
                redirect_url: Some(location),
            },
        }
    }
}

/// POST {access}
pub(super) async fn check_access(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<AccessRequest>,
) -> Result<(CookieJar, Json<AccessResponse>), AppError> {
    if !request.route.starts_with('/') {
        return Err(AppError::Validation(
            "route must be an absolute path".to_string(),
        ));
    }

    let mut session = state.sessions.load(&jar);
    let decision = match state.access.rule_for(&request.route) {
        None => AccessDecision::Allow,
        Some(rule) => {
            let granted = state.flow.granted_permissions(&mut session).await;
            state
                .access
                .evaluate(rule, granted.as_deref(), &request.route)
        }
    };
    let jar = state.sessions.store(jar, &session)?;

    Ok((jar, Json(decision.into())))
}
