//! Provider administration and logout, with their effects on sessions and
//! group memberships.

use crate::display::DisplayNamePattern;
use crate::error::{DirectoryError, LifecycleError};
use crate::reconcile::GroupReconciler;
use rootcause::prelude::Report;
use tracing::{info, instrument, warn};
use vo_federation_core::ProviderId;
use vo_federation_identity::{
    ClaimMapping, NewProvider, Provider, ProviderRegistry, ProviderUpdate, ProviderUpdateOutcome,
    RegistryError, Session, SessionError, SessionManager,
};

/// Tracing target of events emitted when a provider's set of trusted
/// instances changes.
pub const FEDERATION_CHANGE_TARGET: &str = "vo_federation::federation_change";

fn registry_failed(e: Report<RegistryError>) -> LifecycleError {
    match e.current_context() {
        RegistryError::NotFound { provider_id } => LifecycleError::ProviderNotFound {
            provider_id: *provider_id,
        },
        RegistryError::DuplicateIdentifier { identifier } => {
            LifecycleError::DuplicateIdentifier {
                identifier: identifier.clone(),
            }
        }
        RegistryError::InvalidProvider { details } => LifecycleError::InvalidProvider {
            details: details.clone(),
        },
        _ => LifecycleError::Storage {
            details: e.to_string(),
        },
    }
}

fn session_failed(e: Report<SessionError>) -> LifecycleError {
    match e.current_context() {
        SessionError::NotFound { uid, provider_id } => LifecycleError::SessionNotFound {
            uid: uid.clone(),
            provider_id: *provider_id,
        },
        _ => LifecycleError::Storage {
            details: e.to_string(),
        },
    }
}

fn directory_failed(e: Report<DirectoryError>) -> LifecycleError {
    LifecycleError::Directory {
        details: e.to_string(),
    }
}

fn validate_claims(claims: &ClaimMapping) -> Result<(), LifecycleError> {
    DisplayNamePattern::new(&claims.groups_regex).map_err(|e| {
        LifecycleError::InvalidProvider {
            details: format!("groups regex: {}", e),
        }
    })?;
    Ok(())
}

fn groups_mapping_changed(previous: &ClaimMapping, current: &ClaimMapping) -> bool {
    previous.groups_claim != current.groups_claim || previous.groups_regex != current.groups_regex
}

/// Provider create/update/delete and session logout.
#[derive(Clone)]
pub struct ProviderLifecycle {
    registry: ProviderRegistry,
    sessions: SessionManager,
    reconciler: GroupReconciler,
}

impl ProviderLifecycle {
    pub fn new(
        registry: ProviderRegistry,
        sessions: SessionManager,
        reconciler: GroupReconciler,
    ) -> Self {
        Self {
            registry,
            sessions,
            reconciler,
        }
    }

    /// Creates a provider.
    pub async fn create_provider(
        &self,
        new: NewProvider,
    ) -> Result<Provider, Report<LifecycleError>> {
        validate_claims(&new.claims)?;
        Ok(self.registry.create(new).await.map_err(registry_failed)?)
    }

    /// Updates a provider.
    ///
    /// When the groups claim or the groups regex changed, the display names
    /// of the provider's groups are recomputed. A change of trusted
    /// instances emits an event on [`FEDERATION_CHANGE_TARGET`].
    #[instrument(skip(self, update), fields(provider_id = %id))]
    pub async fn update_provider(
        &self,
        id: ProviderId,
        update: ProviderUpdate,
    ) -> Result<ProviderUpdateOutcome, Report<LifecycleError>> {
        validate_claims(&update.claims)?;
        let outcome = self
            .registry
            .update(id, update)
            .await
            .map_err(registry_failed)?;

        if groups_mapping_changed(&outcome.previous.claims, &outcome.provider.claims) {
            self.reconciler
                .update_all_provider_groups(&outcome.provider)
                .await
                .map_err(directory_failed)?;
        }

        if outcome.trusted_instances_changed {
            info!(
                target: FEDERATION_CHANGE_TARGET,
                provider_id = %id,
                identifier = %outcome.provider.identifier,
                "federation change"
            );
        }

        Ok(outcome)
    }

    /// Deletes a provider with its trusted instances and sessions, and
    /// empties the groups it owns.
    ///
    /// Memberships and sessions go first: the directory may drop the
    /// provider tag of its groups as soon as the provider row is gone.
    #[instrument(skip(self), fields(provider_id = %id))]
    pub async fn delete_provider(&self, id: ProviderId) -> Result<Provider, Report<LifecycleError>> {
        self.registry.get(id).await.map_err(registry_failed)?;
        let memberships = self
            .reconciler
            .remove_all_provider_memberships(id)
            .await
            .map_err(directory_failed)?;
        let sessions = self
            .sessions
            .delete_all_for_provider(id)
            .await
            .map_err(session_failed)?;
        let provider = self.registry.delete(id).await.map_err(registry_failed)?;
        info!(sessions, memberships, "provider deleted");
        Ok(provider)
    }

    /// Ends `uid`'s session at a provider and removes them from the
    /// provider's groups.
    #[instrument(skip(self))]
    pub async fn logout(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Session, Report<LifecycleError>> {
        let session = self
            .sessions
            .delete(uid, provider_id)
            .await
            .map_err(session_failed)?;
        if let Err(e) = self.reconciler.remove_all_session_memberships(&session).await {
            warn!(error = %e, "failed to remove memberships after logout");
            return Err(directory_failed(e).into());
        }
        Ok(session)
    }
}
