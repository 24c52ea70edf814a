//! Provider administration and per-user sessions.

use crate::auth::{AdminUser, LocalUser};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::info;
use vo_federation_core::ProviderId;
use vo_federation_identity::{NewProvider, Provider, ProviderUpdate, ProviderWithInstances, Session};

/// Lists every provider with its trusted instances.
pub async fn list(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<ProviderWithInstances>>, ApiError> {
    Ok(Json(state.registry.list_with_trusted_instances().await?))
}

/// Creates a provider.
pub async fn create(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(new): Json<NewProvider>,
) -> Result<(StatusCode, Json<Provider>), ApiError> {
    let provider = state.lifecycle.create_provider(new).await?;
    info!(%admin, provider_id = %provider.id, identifier = %provider.identifier, "provider created");
    Ok((StatusCode::CREATED, Json(provider)))
}

/// Updates a provider.
pub async fn update(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Path(id): Path<ProviderId>,
    Json(update): Json<ProviderUpdate>,
) -> Result<Json<Provider>, ApiError> {
    let outcome = state.lifecycle.update_provider(id, update).await?;
    Ok(Json(outcome.provider))
}

/// Deletes a provider with its sessions and group memberships.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<ProviderId>,
) -> Result<Json<Provider>, ApiError> {
    let provider = state.lifecycle.delete_provider(id).await?;
    info!(%admin, provider_id = %id, "provider deleted");
    Ok(Json(provider))
}

/// Ends the caller's session at a provider.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    LocalUser(uid): LocalUser,
    Path(id): Path<ProviderId>,
) -> Result<StatusCode, ApiError> {
    state.lifecycle.logout(&uid, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's sessions, without tokens.
pub async fn sessions(
    State(state): State<Arc<AppState>>,
    LocalUser(uid): LocalUser,
) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(state.sessions.list_for_user(&uid).await?))
}
