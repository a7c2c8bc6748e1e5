//! Login, register, callback and logout handlers

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;

use crate::AppState;
use crate::auth::{CallbackQuery, LoginIntent, LoginParams};
use crate::error::AppError;

/// GET {login}
///
/// Redirects to the Kinde sign-in page. Accepts `post_login_redirect_url`
/// plus provider passthrough parameters (e.g. `org_code`).
pub(super) async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    start_flow(&state, jar, LoginIntent::Login, query)
}

/// GET {register}
pub(super) async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    start_flow(&state, jar, LoginIntent::Register, query)
}

fn start_flow(
    state: &AppState,
    jar: CookieJar,
    intent: LoginIntent,
    query: BTreeMap<String, String>,
) -> Result<(CookieJar, Redirect), AppError> {
    let mut session = state.sessions.load(&jar);
    let url = state
        .flow
        .begin_login(&mut session, LoginParams::from_query(intent, query))?;
    let jar = state.sessions.store(jar, &session)?;

    Ok((jar, Redirect::to(url.as_str())))
}

/// GET {callback}
///
/// The session is written back even on failure so the consumed state
/// cannot be replayed.
pub(super) async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let mut session = state.sessions.load(&jar);
    let result = state.flow.complete_callback(&mut session, query).await;

    let jar = match state.sessions.store(jar, &session) {
        Ok(jar) => jar,
        Err(error) => return error.into_response(),
    };

    match result {
        Ok(outcome) => (jar, Redirect::to(&outcome.redirect_to)).into_response(),
        Err(error) => (jar, error).into_response(),
    }
}

/// GET {logout}
pub(super) async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let mut session = state.sessions.load(&jar);
    let url = state.flow.logout(&mut session);
    let jar = state.sessions.store(jar, &session)?;

    Ok((jar, Redirect::to(url.as_str())))
}
