//! Federated share queue rows.

use super::backend;
use async_trait::async_trait;
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::error;
use vo_federation_core::{FederatedGroupShareId, InstanceId, ShareRowId, StoreError};
use vo_federation_sharing::{FederatedShare, NewFederatedShare, NotificationAction, ShareStore};

/// Row type for share queries.
#[derive(FromRow)]
struct ShareRow {
    id: i64,
    federated_group_share_id: i64,
    instance_id: i64,
    cloud_id: Option<String>,
    accepted: i16,
    token: Option<String>,
    notification: Option<String>,
    #[sqlx(rename = "try")]
    tries: i32,
}

impl ShareRow {
    fn try_into_share(self) -> Result<FederatedShare, StoreError> {
        let notification = self
            .notification
            .as_deref()
            .map(NotificationAction::from_str)
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                entity: "share",
                details: format!("share row {}: {}", self.id, e),
            })?;
        Ok(FederatedShare {
            id: ShareRowId::new(self.id),
            federated_group_share_id: FederatedGroupShareId::new(self.federated_group_share_id),
            instance_id: InstanceId::new(self.instance_id),
            cloud_id: self.cloud_id,
            accepted: self.accepted,
            token: self.token,
            notification,
            tries: self.tries,
        })
    }
}

fn into_shares(rows: Vec<ShareRow>) -> Result<Vec<FederatedShare>, StoreError> {
    rows.into_iter().map(ShareRow::try_into_share).collect()
}

/// Decodes queue selections row by row. Undecodable rows are logged and
/// left out so they cannot stall the rest of the queue.
fn decodable_shares(rows: Vec<ShareRow>) -> Vec<FederatedShare> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match row.try_into_share() {
                Ok(share) => Some(share),
                Err(e) => {
                    error!(row_id = id, error = %e, "skipping undecodable share row");
                    None
                }
            }
        })
        .collect()
}

const SHARE_COLUMNS: &str = r#"id, federated_group_share_id, instance_id, cloud_id, accepted,
    token, notification, "try""#;

/// Repository for the `shares` table.
#[derive(Clone)]
pub struct PgShareStore {
    pool: PgPool,
}

impl PgShareStore {
    /// Creates a new share repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShareStore for PgShareStore {
    async fn get(&self, id: ShareRowId) -> Result<Option<FederatedShare>, Report<StoreError>> {
        let sql = format!("SELECT {SHARE_COLUMNS} FROM shares WHERE id = $1");
        let row: Option<ShareRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(r) => Ok(Some(r.try_into_share()?)),
            None => Ok(None),
        }
    }

    async fn find_all(
        &self,
        federated_group_share_id: FederatedGroupShareId,
    ) -> Result<Vec<FederatedShare>, Report<StoreError>> {
        let sql = format!(
            "SELECT {SHARE_COLUMNS} FROM shares WHERE federated_group_share_id = $1 ORDER BY id"
        );
        let rows: Vec<ShareRow> = sqlx::query_as(&sql)
            .bind(federated_group_share_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(into_shares(rows)?)
    }

    async fn pending(
        &self,
        max_tries: i32,
        limit: usize,
    ) -> Result<Vec<FederatedShare>, Report<StoreError>> {
        let sql = format!(
            r#"SELECT {SHARE_COLUMNS} FROM shares
            WHERE notification IS NOT NULL AND "try" < $1
            ORDER BY "try" ASC, id ASC
            LIMIT $2"#
        );
        let rows: Vec<ShareRow> = sqlx::query_as(&sql)
            .bind(max_tries)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(decodable_shares(rows))
    }

    async fn dead_letters(
        &self,
        max_tries: i32,
    ) -> Result<Vec<FederatedShare>, Report<StoreError>> {
        let sql = format!(
            r#"SELECT {SHARE_COLUMNS} FROM shares
            WHERE notification IS NOT NULL AND "try" >= $1
            ORDER BY id"#
        );
        let rows: Vec<ShareRow> = sqlx::query_as(&sql)
            .bind(max_tries)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(decodable_shares(rows))
    }

    async fn insert(&self, share: &NewFederatedShare) -> Result<FederatedShare, Report<StoreError>> {
        let sql = format!(
            r#"INSERT INTO shares (federated_group_share_id, instance_id, cloud_id, token,
                                   notification, "try")
            VALUES ($1, $2, $3, $4, $5, 0)
            RETURNING {SHARE_COLUMNS}"#
        );
        let row: ShareRow = sqlx::query_as(&sql)
            .bind(share.federated_group_share_id.get())
            .bind(share.instance_id.get())
            .bind(&share.cloud_id)
            .bind(&share.token)
            .bind(share.notification.map(|action| action.as_str()))
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        Ok(row.try_into_share()?)
    }

    async fn update(&self, share: &FederatedShare) -> Result<(), Report<StoreError>> {
        let result = sqlx::query(
            r#"
            UPDATE shares
            SET cloud_id = $2, accepted = $3, token = $4, notification = $5, "try" = $6
            WHERE id = $1
            "#,
        )
        .bind(share.id.get())
        .bind(&share.cloud_id)
        .bind(share.accepted)
        .bind(&share.token)
        .bind(share.notification.map(|action| action.as_str()))
        .bind(share.tries)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend {
                details: format!("share row {} does not exist", share.id),
            }
            .into());
        }
        Ok(())
    }
}
