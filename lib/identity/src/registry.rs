//! Provider registry.
//!
//! Holds the configured identity providers: client credentials, endpoints,
//! claim mapping and the trusted remote instances federating each
//! provider's groups.

use crate::error::RegistryError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use vo_federation_core::{HttpClient, ProviderId, StoreError, TrustedInstanceId};

/// Default OAuth scope requested from providers.
pub const DEFAULT_SCOPE: &str = "openid email profile";

/// Claim names and the group display-name pattern for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMapping {
    /// Claim carrying the external user id.
    #[serde(default = "default_uid_claim")]
    pub uid_claim: String,
    /// Claim carrying the display name.
    #[serde(default = "default_display_name_claim")]
    pub display_name_claim: String,
    /// Claim carrying the list of group ids.
    #[serde(default = "default_groups_claim")]
    pub groups_claim: String,
    /// Pattern applied to a group id to derive its display name.
    #[serde(default = "default_groups_regex")]
    pub groups_regex: String,
}

fn default_uid_claim() -> String {
    "sub".to_string()
}

fn default_display_name_claim() -> String {
    "name".to_string()
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

fn default_groups_regex() -> String {
    ".*".to_string()
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            uid_claim: default_uid_claim(),
            display_name_claim: default_display_name_claim(),
            groups_claim: default_groups_claim(),
            groups_regex: default_groups_regex(),
        }
    }
}

/// Free-form provider settings, stored as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    /// Space-separated names of additional claims to request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_claims: Option<String>,
}

impl ProviderSettings {
    /// Returns the configured extra claim names.
    #[must_use]
    pub fn extra_claims(&self) -> Vec<&str> {
        self.extra_claims
            .as_deref()
            .map(|claims| claims.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// A configured identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: ProviderId,
    pub identifier: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub discovery_endpoint: Option<String>,
    pub scope: String,
    #[serde(flatten)]
    pub claims: ClaimMapping,
    pub settings: ProviderSettings,
}

/// Input for creating a provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProvider {
    pub identifier: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub discovery_endpoint: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(flatten)]
    pub claims: ClaimMapping,
    #[serde(default)]
    pub settings: ProviderSettings,
    #[serde(default)]
    pub trusted_instances: Vec<String>,
}

/// Input for updating a provider. An omitted client secret keeps the
/// stored one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUpdate {
    pub identifier: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub discovery_endpoint: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(flatten)]
    pub claims: ClaimMapping,
    #[serde(default)]
    pub settings: ProviderSettings,
    #[serde(default)]
    pub trusted_instances: Vec<String>,
}

/// Result of [`ProviderRegistry::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUpdateOutcome {
    /// The provider as it was before the update.
    pub previous: Provider,
    /// The provider as stored now.
    pub provider: Provider,
    /// Whether any trusted instance row was inserted or deleted.
    pub trusted_instances_changed: bool,
}

/// A trusted remote instance of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedInstance {
    pub id: TrustedInstanceId,
    pub provider_id: ProviderId,
    pub instance_url: String,
}

/// A provider together with its trusted instance URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderWithInstances {
    #[serde(flatten)]
    pub provider: Provider,
    pub trusted_instances: Vec<String>,
}

/// Endpoint kinds a provider exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Authorization,
    Token,
    Jwks,
    Userinfo,
}

impl EndpointKind {
    /// Returns the name used in error messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::Token => "token",
            Self::Jwks => "jwks",
            Self::Userinfo => "userinfo",
        }
    }
}

/// A provider's endpoints after applying discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub authorization: Option<String>,
    pub token: Option<String>,
    pub jwks: Option<String>,
    pub userinfo: Option<String>,
}

impl Endpoints {
    /// Returns the endpoint of the given kind, if known.
    #[must_use]
    pub fn get(&self, kind: EndpointKind) -> Option<&str> {
        let endpoint = match kind {
            EndpointKind::Authorization => &self.authorization,
            EndpointKind::Token => &self.token,
            EndpointKind::Jwks => &self.jwks,
            EndpointKind::Userinfo => &self.userinfo,
        };
        endpoint.as_deref().filter(|url| !url.is_empty())
    }

    fn is_complete(&self) -> bool {
        [
            EndpointKind::Authorization,
            EndpointKind::Token,
            EndpointKind::Jwks,
            EndpointKind::Userinfo,
        ]
        .iter()
        .all(|kind| self.get(*kind).is_some())
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    jwks_uri: Option<String>,
    userinfo_endpoint: Option<String>,
}

/// Storage for providers and their trusted instances.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Returns every provider ordered by id.
    async fn list(&self) -> Result<Vec<Provider>, Report<StoreError>>;

    /// Returns the provider with this id.
    async fn get(&self, id: ProviderId) -> Result<Option<Provider>, Report<StoreError>>;

    /// Returns the provider with this identifier.
    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Provider>, Report<StoreError>>;

    /// Inserts a provider, ignoring its id, and returns it with the assigned id.
    async fn insert(&self, provider: &Provider) -> Result<Provider, Report<StoreError>>;

    /// Overwrites every column of an existing provider.
    async fn update(&self, provider: &Provider) -> Result<(), Report<StoreError>>;

    /// Deletes a provider row. Returns false if it did not exist.
    async fn delete(&self, id: ProviderId) -> Result<bool, Report<StoreError>>;

    /// Returns the trusted instances of a provider.
    async fn trusted_instances(
        &self,
        provider_id: ProviderId,
    ) -> Result<Vec<TrustedInstance>, Report<StoreError>>;

    /// Adds a trusted instance.
    async fn insert_trusted_instance(
        &self,
        provider_id: ProviderId,
        instance_url: &str,
    ) -> Result<TrustedInstance, Report<StoreError>>;

    /// Removes one trusted instance row.
    async fn delete_trusted_instance(&self, id: TrustedInstanceId)
    -> Result<(), Report<StoreError>>;

    /// Removes every trusted instance of a provider.
    async fn delete_trusted_instances(
        &self,
        provider_id: ProviderId,
    ) -> Result<u64, Report<StoreError>>;
}

fn storage(e: Report<StoreError>) -> RegistryError {
    RegistryError::Storage {
        details: e.to_string(),
    }
}

/// CRUD over providers plus trusted-instance diffing and endpoint discovery.
#[derive(Clone)]
pub struct ProviderRegistry {
    store: Arc<dyn ProviderStore>,
    http: Arc<dyn HttpClient>,
}

impl ProviderRegistry {
    /// Creates a registry over the given store.
    pub fn new(store: Arc<dyn ProviderStore>, http: Arc<dyn HttpClient>) -> Self {
        Self { store, http }
    }

    /// Returns every provider with its trusted instance URLs.
    pub async fn list_with_trusted_instances(
        &self,
    ) -> Result<Vec<ProviderWithInstances>, Report<RegistryError>> {
        let providers = self.store.list().await.map_err(storage)?;
        let mut result = Vec::with_capacity(providers.len());
        for provider in providers {
            let trusted_instances = self.trusted_instances(provider.id).await?;
            result.push(ProviderWithInstances {
                provider,
                trusted_instances,
            });
        }
        Ok(result)
    }

    /// Returns a provider, failing if it does not exist.
    pub async fn get(&self, id: ProviderId) -> Result<Provider, Report<RegistryError>> {
        self.store
            .get(id)
            .await
            .map_err(storage)?
            .ok_or_else(|| RegistryError::NotFound { provider_id: id }.into())
    }

    /// Looks a provider up by its identifier.
    pub async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Provider>, Report<RegistryError>> {
        Ok(self
            .store
            .find_by_identifier(identifier)
            .await
            .map_err(storage)?)
    }

    /// Returns the trusted instance URLs of a provider.
    pub async fn trusted_instances(
        &self,
        provider_id: ProviderId,
    ) -> Result<Vec<String>, Report<RegistryError>> {
        let rows = self
            .store
            .trusted_instances(provider_id)
            .await
            .map_err(storage)?;
        Ok(rows.into_iter().map(|row| row.instance_url).collect())
    }

    /// Creates a provider and its trusted instances.
    #[instrument(skip(self, new), fields(identifier = %new.identifier))]
    pub async fn create(&self, new: NewProvider) -> Result<Provider, Report<RegistryError>> {
        validate(&new.identifier, &new.client_id)?;

        if self.find_by_identifier(&new.identifier).await?.is_some() {
            return Err(RegistryError::DuplicateIdentifier {
                identifier: new.identifier,
            }
            .into());
        }

        let candidate = Provider {
            id: ProviderId::new(0),
            identifier: new.identifier,
            client_id: new.client_id,
            client_secret: new.client_secret,
            discovery_endpoint: non_empty(new.discovery_endpoint),
            scope: new.scope,
            claims: new.claims,
            settings: new.settings,
        };

        let provider = self.store.insert(&candidate).await.map_err(|e| {
            match e.current_context() {
                StoreError::Duplicate { key, .. } => RegistryError::DuplicateIdentifier {
                    identifier: key.clone(),
                },
                _ => storage(e),
            }
        })?;

        self.replace_trusted_instances(provider.id, &new.trusted_instances)
            .await?;

        info!(provider_id = %provider.id, "provider created");
        Ok(provider)
    }

    /// Updates a provider and diffs its trusted instances.
    #[instrument(skip(self, update), fields(provider_id = %id))]
    pub async fn update(
        &self,
        id: ProviderId,
        update: ProviderUpdate,
    ) -> Result<ProviderUpdateOutcome, Report<RegistryError>> {
        validate(&update.identifier, &update.client_id)?;

        let previous = self.get(id).await?;

        let taken = self
            .find_by_identifier(&update.identifier)
            .await?
            .is_some_and(|other| other.id != id);
        if taken {
            return Err(RegistryError::DuplicateIdentifier {
                identifier: update.identifier,
            }
            .into());
        }

        let client_secret = match update.client_secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => previous.client_secret.clone(),
        };

        let provider = Provider {
            id,
            identifier: update.identifier,
            client_id: update.client_id,
            client_secret,
            discovery_endpoint: non_empty(update.discovery_endpoint),
            scope: update.scope,
            claims: update.claims,
            settings: update.settings,
        };

        self.store.update(&provider).await.map_err(storage)?;
        let trusted_instances_changed = self
            .replace_trusted_instances(id, &update.trusted_instances)
            .await?;

        Ok(ProviderUpdateOutcome {
            previous,
            provider,
            trusted_instances_changed,
        })
    }

    /// Deletes a provider row and its trusted instances.
    ///
    /// Sessions and group memberships are removed by the caller; see the
    /// provider lifecycle in the groups crate.
    #[instrument(skip(self), fields(provider_id = %id))]
    pub async fn delete(&self, id: ProviderId) -> Result<Provider, Report<RegistryError>> {
        let provider = self.get(id).await?;
        self.store.delete(id).await.map_err(storage)?;
        let removed = self
            .store
            .delete_trusted_instances(id)
            .await
            .map_err(storage)?;
        debug!(removed, "trusted instances removed");
        Ok(provider)
    }

    /// Replaces a provider's trusted instances with `urls`.
    ///
    /// Stale rows are deleted and missing ones inserted; rows present in both
    /// are left alone. Returns whether anything was inserted or deleted.
    pub async fn replace_trusted_instances(
        &self,
        provider_id: ProviderId,
        urls: &[String],
    ) -> Result<bool, Report<RegistryError>> {
        let current = self
            .store
            .trusted_instances(provider_id)
            .await
            .map_err(storage)?;
        let wanted: HashSet<&str> = urls.iter().map(String::as_str).collect();
        let mut kept = HashSet::new();
        let mut changes = 0usize;

        for row in &current {
            if wanted.contains(row.instance_url.as_str()) {
                kept.insert(row.instance_url.clone());
            } else {
                self.store
                    .delete_trusted_instance(row.id)
                    .await
                    .map_err(storage)?;
                changes += 1;
            }
        }

        for url in urls {
            if kept.contains(url) {
                continue;
            }
            self.store
                .insert_trusted_instance(provider_id, url)
                .await
                .map_err(storage)?;
            kept.insert(url.clone());
            changes += 1;
        }

        debug!(provider_id = %provider_id, changes, "trusted instances reconciled");
        Ok(changes != 0)
    }

    /// Resolves the provider's endpoints.
    ///
    /// Explicit settings win. Missing endpoints are filled from the discovery
    /// document when one is configured; the document is read, not validated.
    pub async fn resolve_endpoints(
        &self,
        provider: &Provider,
    ) -> Result<Endpoints, Report<RegistryError>> {
        let mut endpoints = Endpoints {
            authorization: provider.settings.authorization_endpoint.clone(),
            token: provider.settings.token_endpoint.clone(),
            jwks: provider.settings.jwks_endpoint.clone(),
            userinfo: provider.settings.userinfo_endpoint.clone(),
        };

        let Some(discovery_url) = provider.discovery_endpoint.as_deref() else {
            return Ok(endpoints);
        };
        if endpoints.is_complete() {
            return Ok(endpoints);
        }

        let discovery_failed = |details: String| RegistryError::DiscoveryFailed {
            url: discovery_url.to_string(),
            details,
        };
        let response = self
            .http
            .get(discovery_url, &[])
            .await
            .map_err(|e| discovery_failed(e.to_string()))?;
        if !response.is_success() {
            return Err(discovery_failed(format!("status {}", response.status)).into());
        }
        let document: DiscoveryDocument = response
            .json()
            .map_err(|e| discovery_failed(e.to_string()))?;

        fill(&mut endpoints.authorization, document.authorization_endpoint);
        fill(&mut endpoints.token, document.token_endpoint);
        fill(&mut endpoints.jwks, document.jwks_uri);
        fill(&mut endpoints.userinfo, document.userinfo_endpoint);

        Ok(endpoints)
    }

    /// Resolves a single endpoint, failing if the provider has none.
    pub async fn endpoint(
        &self,
        provider: &Provider,
        kind: EndpointKind,
    ) -> Result<String, Report<RegistryError>> {
        let endpoints = self.resolve_endpoints(provider).await?;
        endpoints.get(kind).map(str::to_string).ok_or_else(|| {
            RegistryError::MissingEndpoint {
                provider_id: provider.id,
                endpoint: kind.as_str(),
            }
            .into()
        })
    }
}

fn fill(slot: &mut Option<String>, discovered: Option<String>) {
    if slot.as_deref().is_none_or(str::is_empty) {
        *slot = discovered.or(slot.take());
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn validate(identifier: &str, client_id: &str) -> Result<(), Report<RegistryError>> {
    if identifier.trim().is_empty() {
        return Err(RegistryError::InvalidProvider {
            details: "identifier must not be empty".to_string(),
        }
        .into());
    }
    if client_id.trim().is_empty() {
        return Err(RegistryError::InvalidProvider {
            details: "client id must not be empty".to_string(),
        }
        .into());
    }
    Ok(())
}
