//! Login at a provider, its callback, and on-demand group sync.

use crate::auth::{LocalUser, request_context};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::Arc;
use time::Duration as TimeDuration;
use tracing::{debug, info};
use vo_federation_core::{ErrorClass, ProviderId};
use vo_federation_groups::SyncReport;
use vo_federation_identity::{CallbackParams, PendingLogin};

/// Cookie holding the pending login between redirect and callback.
const PENDING_LOGIN_COOKIE: &str = "vo_federation_login";

/// Redirects the caller to the provider's authorization endpoint.
pub async fn login(
    State(state): State<Arc<AppState>>,
    LocalUser(_): LocalUser,
    Path(provider_id): Path<ProviderId>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let context = request_context(&headers, &state.config.public_url);
    let redirect = state.login.begin_login(provider_id, context).await?;

    let pending = serde_json::to_string(&redirect.pending).map_err(|e| ApiError::Domain {
        class: ErrorClass::Internal,
        message: format!("failed to encode pending login: {}", e),
    })?;
    let cookie = Cookie::build((PENDING_LOGIN_COOKIE, pending))
        .path("/")
        .http_only(true)
        .secure(state.config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(10));

    Ok((jar.add(cookie), Redirect::to(&redirect.authorization_url)))
}

/// Completes a login. The pending login cookie is cleared whatever the
/// outcome.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    LocalUser(uid): LocalUser,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> impl IntoResponse {
    let pending: Option<PendingLogin> = jar
        .get(PENDING_LOGIN_COOKIE)
        .and_then(|cookie| serde_json::from_str(cookie.value()).ok());

    let remove_pending = Cookie::build((PENDING_LOGIN_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO);
    let jar = jar.add(remove_pending);

    let result = match state.login.handle_callback(&uid, pending, params).await {
        Ok(outcome) => {
            info!(%uid, provider_id = %outcome.session.provider_id, stage = %outcome.stage, "login completed");
            Ok(Redirect::to(&outcome.redirect_url))
        }
        Err(e) => Err(ApiError::from(e)),
    };

    (jar, result)
}

/// Synchronises the caller's groups at every provider they are logged in to.
pub async fn sync(
    State(state): State<Arc<AppState>>,
    LocalUser(uid): LocalUser,
) -> Result<Json<Vec<SyncReport>>, ApiError> {
    let reports = state.reconciler.sync_all_sessions(&uid).await?;
    if reports.is_empty() {
        debug!(%uid, "no sessions to synchronise");
    }
    Ok(Json(reports))
}
