//! Providers and their trusted instances.

use super::{backend, unique_or_backend};
use async_trait::async_trait;
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use vo_federation_core::{ProviderId, StoreError, TrustedInstanceId};
use vo_federation_identity::{
    ClaimMapping, Provider, ProviderSettings, ProviderStore, TrustedInstance,
};

/// Row type for provider queries.
#[derive(FromRow)]
struct ProviderRow {
    id: i64,
    identifier: String,
    client_id: String,
    client_secret: String,
    discovery_endpoint: Option<String>,
    scope: String,
    uid_claim: String,
    display_name_claim: String,
    groups_claim: String,
    groups_regex: String,
    settings: serde_json::Value,
}

impl ProviderRow {
    fn try_into_provider(self) -> Result<Provider, StoreError> {
        if !self.settings.is_object() {
            return Err(StoreError::Corrupt {
                entity: "provider",
                details: format!("settings of provider {} are not an object", self.id),
            });
        }
        let settings: ProviderSettings =
            serde_json::from_value(self.settings).map_err(|e| StoreError::Corrupt {
                entity: "provider",
                details: format!("settings of provider {}: {}", self.id, e),
            })?;
        Ok(Provider {
            id: ProviderId::new(self.id),
            identifier: self.identifier,
            client_id: self.client_id,
            client_secret: self.client_secret,
            discovery_endpoint: self.discovery_endpoint,
            scope: self.scope,
            claims: ClaimMapping {
                uid_claim: self.uid_claim,
                display_name_claim: self.display_name_claim,
                groups_claim: self.groups_claim,
                groups_regex: self.groups_regex,
            },
            settings,
        })
    }
}

/// Row type for trusted instance queries.
#[derive(FromRow)]
struct TrustedInstanceRow {
    id: i64,
    provider_id: i64,
    instance_url: String,
}

impl From<TrustedInstanceRow> for TrustedInstance {
    fn from(row: TrustedInstanceRow) -> Self {
        Self {
            id: TrustedInstanceId::new(row.id),
            provider_id: ProviderId::new(row.provider_id),
            instance_url: row.instance_url,
        }
    }
}

fn settings_json(provider: &Provider) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(&provider.settings).map_err(|e| StoreError::Corrupt {
        entity: "provider",
        details: e.to_string(),
    })
}

const PROVIDER_COLUMNS: &str = "id, identifier, client_id, client_secret, discovery_endpoint, \
     scope, uid_claim, display_name_claim, groups_claim, groups_regex, settings";

/// Repository for the `providers` and `trusted_instances` tables.
#[derive(Clone)]
pub struct PgProviderStore {
    pool: PgPool,
}

impl PgProviderStore {
    /// Creates a new provider repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderStore for PgProviderStore {
    async fn list(&self) -> Result<Vec<Provider>, Report<StoreError>> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers ORDER BY id");
        let rows: Vec<ProviderRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(ProviderRow::try_into_provider)
            .collect::<Result<_, _>>()?)
    }

    async fn get(&self, id: ProviderId) -> Result<Option<Provider>, Report<StoreError>> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = $1");
        let row: Option<ProviderRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(r) => Ok(Some(r.try_into_provider()?)),
            None => Ok(None),
        }
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Provider>, Report<StoreError>> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE identifier = $1");
        let row: Option<ProviderRow> = sqlx::query_as(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(r) => Ok(Some(r.try_into_provider()?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, provider: &Provider) -> Result<Provider, Report<StoreError>> {
        let settings = settings_json(provider)?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO providers (identifier, client_id, client_secret, discovery_endpoint,
                                   scope, uid_claim, display_name_claim, groups_claim,
                                   groups_regex, settings)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&provider.identifier)
        .bind(&provider.client_id)
        .bind(&provider.client_secret)
        .bind(&provider.discovery_endpoint)
        .bind(&provider.scope)
        .bind(&provider.claims.uid_claim)
        .bind(&provider.claims.display_name_claim)
        .bind(&provider.claims.groups_claim)
        .bind(&provider.claims.groups_regex)
        .bind(settings)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_or_backend(e, "provider", &provider.identifier))?;

        Ok(Provider {
            id: ProviderId::new(id),
            ..provider.clone()
        })
    }

    async fn update(&self, provider: &Provider) -> Result<(), Report<StoreError>> {
        let settings = settings_json(provider)?;
        sqlx::query(
            r#"
            UPDATE providers
            SET identifier = $2, client_id = $3, client_secret = $4, discovery_endpoint = $5,
                scope = $6, uid_claim = $7, display_name_claim = $8, groups_claim = $9,
                groups_regex = $10, settings = $11
            WHERE id = $1
            "#,
        )
        .bind(provider.id.get())
        .bind(&provider.identifier)
        .bind(&provider.client_id)
        .bind(&provider.client_secret)
        .bind(&provider.discovery_endpoint)
        .bind(&provider.scope)
        .bind(&provider.claims.uid_claim)
        .bind(&provider.claims.display_name_claim)
        .bind(&provider.claims.groups_claim)
        .bind(&provider.claims.groups_regex)
        .bind(settings)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_or_backend(e, "provider", &provider.identifier))?;

        Ok(())
    }

    async fn delete(&self, id: ProviderId) -> Result<bool, Report<StoreError>> {
        let result = sqlx::query("DELETE FROM providers WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn trusted_instances(
        &self,
        provider_id: ProviderId,
    ) -> Result<Vec<TrustedInstance>, Report<StoreError>> {
        let rows: Vec<TrustedInstanceRow> = sqlx::query_as(
            r#"
            SELECT id, provider_id, instance_url
            FROM trusted_instances
            WHERE provider_id = $1
            ORDER BY id
            "#,
        )
        .bind(provider_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(TrustedInstance::from).collect())
    }

    async fn insert_trusted_instance(
        &self,
        provider_id: ProviderId,
        instance_url: &str,
    ) -> Result<TrustedInstance, Report<StoreError>> {
        let row: TrustedInstanceRow = sqlx::query_as(
            r#"
            INSERT INTO trusted_instances (provider_id, instance_url)
            VALUES ($1, $2)
            RETURNING id, provider_id, instance_url
            "#,
        )
        .bind(provider_id.get())
        .bind(instance_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_or_backend(e, "trusted instance", instance_url))?;

        Ok(row.into())
    }

    async fn delete_trusted_instance(
        &self,
        id: TrustedInstanceId,
    ) -> Result<(), Report<StoreError>> {
        sqlx::query("DELETE FROM trusted_instances WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn delete_trusted_instances(
        &self,
        provider_id: ProviderId,
    ) -> Result<u64, Report<StoreError>> {
        let result = sqlx::query("DELETE FROM trusted_instances WHERE provider_id = $1")
            .bind(provider_id.get())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected())
    }
}
