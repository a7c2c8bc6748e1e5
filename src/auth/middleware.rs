//! Route guard middleware and user extractors
//!
//! Applies the navigation guard and access policy to every request that
//! is not an authentication endpoint.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header::ACCEPT, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;

use super::access::AccessDecision;
use super::flow::TokenSnapshot;
use super::guard::GuardDecision;
use crate::AppState;
use crate::error::AppError;
use crate::metrics::GUARD_DECISIONS_TOTAL;

/// Middleware enforcing the route guard and access rules
///
/// Any session change made along the way (a refreshed token, a dropped
/// invalid token) is written back on the response.
///
/// # Usage
/// ```ignore
/// let app = Router::new()
///     .route("/dashboard", get(dashboard))
///     .layer(middleware::from_fn_with_state(state, route_guard));
/// ```
pub async fn route_guard(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if state.config.endpoints.contains(&path) {
        return next.run(request).await;
    }

    let rule = state.access.rule_for(&path).cloned();
    if !state.guard.applies_to(&path) && rule.is_none() {
        return next.run(request).await;
    }

    let destination = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let wants_json = accepts_json(&request);

    let mut session = state.sessions.load(&jar);
    let snapshot = state.flow.authenticated(&mut session).await;

    let decision = state.guard.evaluate(&destination, snapshot.is_some());
    GUARD_DECISIONS_TOTAL
        .with_label_values(&[decision.label()])
        .inc();

    let response = match decision {
        GuardDecision::RedirectToLogin { location }
        | GuardDecision::RedirectToLanding { location } => {
            tracing::debug!(path = %path, %location, "Route guard redirect");
            Redirect::to(&location).into_response()
        }
        GuardDecision::Allow => {
            let access = match (&rule, &snapshot) {
                (None, _) => AccessDecision::Allow,
                (Some(rule), None) => state.access.evaluate(rule, None, &destination),
                (Some(rule), Some(_)) => {
                    let granted = state.flow.granted_permissions(&mut session).await;
                    state
                        .access
                        .evaluate(rule, granted.as_deref(), &destination)
                }
            };

            match access {
                AccessDecision::Allow => {
                    if let Some(snapshot) = snapshot {
                        request.extensions_mut().insert(snapshot);
                    }
                    next.run(request).await
                }
                // API clients get a 403 they can act on instead of a page
                AccessDecision::Deny { .. } if wants_json => AppError::Forbidden.into_response(),
                AccessDecision::Deny { redirect_url } => Redirect::to(&redirect_url).into_response(),
                AccessDecision::Login { location } => Redirect::to(&location).into_response(),
            }
        }
    };

    match state.sessions.store(jar, &session) {
        Ok(jar) => (jar, response).into_response(),
        Err(error) => error.into_response(),
    }
}

fn accepts_json(request: &Request) -> bool {
    request
        .headers()
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

async fn token_from_parts(parts: &mut Parts, state: &AppState) -> Option<TokenSnapshot> {
    if let Some(snapshot) = parts.extensions.get::<TokenSnapshot>().cloned() {
        return Some(snapshot);
    }

    let jar = CookieJar::from_headers(&parts.headers);
    let mut session = state.sessions.load(&jar);
    let snapshot = state.flow.authenticated(&mut session).await?;
    parts.extensions.insert(snapshot.clone());
    Some(snapshot)
}

/// Extractor for the signed-in user's access token
///
/// Rejects with 401 when the session holds no usable token.
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentUser(token): CurrentUser) -> impl IntoResponse {
///     call_api(token.access_token()).await
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub TokenSnapshot);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        token_from_parts(parts, &state)
            .await
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

/// Optional current user extractor
///
/// Returns None if not authenticated, instead of error.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<TokenSnapshot>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        Ok(MaybeUser(token_from_parts(parts, &state).await))
    }
}
