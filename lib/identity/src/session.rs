//! OIDC session store.
//!
//! One session per (user, provider) pair, holding the tokens issued at
//! login and the metadata of the last group sync.

use crate::error::{RegistryError, SessionError};
use crate::registry::{EndpointKind, ProviderRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use vo_federation_core::http::basic;
use vo_federation_core::{HttpClient, ProviderId, SessionId, StoreError};

/// A persisted OIDC session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub uid: String,
    pub provider_id: ProviderId,
    #[serde(skip_serializing)]
    pub id_token: String,
    pub id_token_sub: String,
    pub id_token_exp: i64,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub access_token_exp: i64,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub refresh_token_exp: i64,
    pub userinfo_display_name: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Fields written by [`SessionManager::create_or_update`].
///
/// `userinfo_display_name` and `last_sync` only overwrite the stored values
/// when given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpsert {
    pub uid: String,
    pub provider_id: ProviderId,
    pub id_token: String,
    pub id_token_sub: String,
    pub id_token_exp: i64,
    pub access_token: String,
    pub access_token_exp: i64,
    pub refresh_token: String,
    pub refresh_token_exp: i64,
    pub userinfo_display_name: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SessionUpsert {
    /// Applies the upsert to an existing session in place.
    pub fn apply_to(&self, session: &mut Session) {
        session.id_token.clone_from(&self.id_token);
        session.id_token_sub.clone_from(&self.id_token_sub);
        session.id_token_exp = self.id_token_exp;
        session.access_token.clone_from(&self.access_token);
        session.access_token_exp = self.access_token_exp;
        session.refresh_token.clone_from(&self.refresh_token);
        session.refresh_token_exp = self.refresh_token_exp;
        if let Some(name) = &self.userinfo_display_name {
            session.userinfo_display_name = Some(name.clone());
        }
        if let Some(at) = self.last_sync {
            session.last_sync = Some(at);
        }
    }
}

/// Storage for sessions.
///
/// `upsert` must be atomic per (uid, provider_id): concurrent upserts for
/// the same key converge on one row, last write wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts or overwrites the session for (uid, provider_id).
    async fn upsert(&self, upsert: &SessionUpsert) -> Result<Session, Report<StoreError>>;

    /// Returns the session for (uid, provider_id).
    async fn find(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Option<Session>, Report<StoreError>>;

    /// Returns every session of a user ordered by provider id.
    async fn list_for_user(&self, uid: &str) -> Result<Vec<Session>, Report<StoreError>>;

    /// Overwrites an existing session row.
    async fn update(&self, session: &Session) -> Result<Session, Report<StoreError>>;

    /// Deletes and returns the session for (uid, provider_id).
    async fn delete(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Option<Session>, Report<StoreError>>;

    /// Deletes every session of a provider and returns the count.
    async fn delete_for_provider(&self, provider_id: ProviderId)
    -> Result<u64, Report<StoreError>>;
}

/// Session handling options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Replace the stored refresh token when the provider issues a new one.
    pub rotate_refresh_token: bool,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    refresh_expires_in: Option<i64>,
}

fn storage(e: Report<StoreError>) -> SessionError {
    SessionError::Storage {
        details: e.to_string(),
    }
}

fn from_registry(e: Report<RegistryError>) -> SessionError {
    match e.current_context() {
        RegistryError::NotFound { provider_id } => SessionError::ProviderNotFound {
            provider_id: *provider_id,
        },
        RegistryError::MissingEndpoint { endpoint, .. } => {
            SessionError::MissingEndpoint {
                endpoint: *endpoint,
            }
        }
        RegistryError::DiscoveryFailed { .. } => SessionError::RefreshFailed {
            details: e.to_string(),
        },
        _ => SessionError::Storage {
            details: e.to_string(),
        },
    }
}

/// Session operations including access-token refresh.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    registry: ProviderRegistry,
    http: Arc<dyn HttpClient>,
    policy: SessionPolicy,
}

impl SessionManager {
    /// Creates a session manager.
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: ProviderRegistry,
        http: Arc<dyn HttpClient>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            http,
            policy,
        }
    }

    /// Inserts the session for (uid, provider) or overwrites it in place.
    #[instrument(skip(self, upsert), fields(uid = %upsert.uid, provider_id = %upsert.provider_id))]
    pub async fn create_or_update(
        &self,
        upsert: SessionUpsert,
    ) -> Result<Session, Report<SessionError>> {
        if upsert.uid.trim().is_empty() {
            return Err(SessionError::MissingRequiredField { field: "uid" }.into());
        }
        if !upsert.provider_id.is_assigned() {
            return Err(SessionError::MissingRequiredField {
                field: "provider_id",
            }
            .into());
        }

        let session = self.store.upsert(&upsert).await.map_err(storage)?;
        debug!(session_id = %session.id, "session stored");
        Ok(session)
    }

    /// Returns the session for (uid, provider), if any.
    pub async fn find(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Option<Session>, Report<SessionError>> {
        Ok(self.store.find(uid, provider_id).await.map_err(storage)?)
    }

    /// Returns the session for (uid, provider), failing if there is none.
    pub async fn get(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Session, Report<SessionError>> {
        self.find(uid, provider_id).await?.ok_or_else(|| {
            SessionError::NotFound {
                uid: uid.to_string(),
                provider_id,
            }
            .into()
        })
    }

    /// Returns every session of a user.
    pub async fn list_for_user(&self, uid: &str) -> Result<Vec<Session>, Report<SessionError>> {
        Ok(self.store.list_for_user(uid).await.map_err(storage)?)
    }

    /// Deletes the session for (uid, provider) and returns it.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Session, Report<SessionError>> {
        self.store
            .delete(uid, provider_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| {
                SessionError::NotFound {
                    uid: uid.to_string(),
                    provider_id,
                }
                .into()
            })
    }

    /// Deletes every session of a provider.
    pub async fn delete_all_for_provider(
        &self,
        provider_id: ProviderId,
    ) -> Result<u64, Report<SessionError>> {
        Ok(self
            .store
            .delete_for_provider(provider_id)
            .await
            .map_err(storage)?)
    }

    /// Records the outcome of a successful userinfo fetch.
    ///
    /// The display name is only replaced when a new one is given.
    pub async fn record_sync(
        &self,
        mut session: Session,
        display_name: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Session, Report<SessionError>> {
        if let Some(name) = display_name {
            session.userinfo_display_name = Some(name);
        }
        session.last_sync = Some(at);
        Ok(self.store.update(&session).await.map_err(storage)?)
    }

    /// Obtains a new access token with the session's refresh token.
    ///
    /// The refresh token itself is only replaced when
    /// [`SessionPolicy::rotate_refresh_token`] is set and the provider
    /// returned one.
    #[instrument(skip(self, session), fields(uid = %session.uid, provider_id = %session.provider_id))]
    pub async fn refresh_access_token(
        &self,
        mut session: Session,
    ) -> Result<Session, Report<SessionError>> {
        let provider = self
            .registry
            .get(session.provider_id)
            .await
            .map_err(from_registry)?;
        let token_endpoint = self
            .registry
            .endpoint(&provider, EndpointKind::Token)
            .await
            .map_err(from_registry)?;

        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), session.refresh_token.clone()),
            ("client_id".to_string(), provider.client_id.clone()),
            ("scope".to_string(), provider.scope.clone()),
        ];
        let headers = [basic(&provider.client_id, &provider.client_secret)];

        debug!("fetching token endpoint for access token");
        let response = self
            .http
            .post_form(&token_endpoint, &form, &headers)
            .await
            .map_err(|e| SessionError::RefreshFailed {
                details: e.to_string(),
            })?;

        if !response.is_success() {
            warn!(status = response.status, "token refresh rejected");
            return Err(SessionError::RefreshRejected {
                status: response.status,
                details: String::from_utf8_lossy(&response.body).into_owned(),
            }
            .into());
        }

        let body: RefreshResponse = response.json().map_err(|e| SessionError::RefreshRejected {
            status: response.status,
            details: e.to_string(),
        })?;
        let access_token = body
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| SessionError::RefreshRejected {
                status: response.status,
                details: "response has no access_token".to_string(),
            })?;

        let now = Utc::now().timestamp();
        session.access_token = access_token;
        if let Some(expires_in) = body.expires_in {
            session.access_token_exp = now + expires_in;
        }
        if self.policy.rotate_refresh_token {
            if let Some(refresh_token) = body.refresh_token.filter(|t| !t.is_empty()) {
                session.refresh_token = refresh_token;
                if let Some(expires_in) = body.refresh_expires_in {
                    session.refresh_token_exp = now + expires_in;
                }
            }
        }

        Ok(self.store.update(&session).await.map_err(storage)?)
    }
}
