//! Read access to the host's share tables.
//!
//! The host platform owns `host_users`, `host_shares`, `host_share_external`
//! and `host_federated_reshares`; this adapter only reads them, except for
//! recording the remote id a partner assigns to a reshare.

use async_trait::async_trait;
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use vo_federation_core::FederatedGroupShareId;
use vo_federation_sharing::{ExternalShare, HostShare, ShareSource, TransportError};

/// Row type for host share queries.
#[derive(FromRow)]
struct HostShareRow {
    id: i64,
    file_target: String,
    uid_owner: String,
    uid_initiator: String,
    share_with: String,
    share_type: i32,
    permissions: i32,
}

impl From<HostShareRow> for HostShare {
    fn from(row: HostShareRow) -> Self {
        Self {
            id: FederatedGroupShareId::new(row.id),
            node_name: row.file_target.trim_start_matches('/').to_string(),
            owner: row.uid_owner,
            shared_by: row.uid_initiator,
            shared_with: row.share_with,
            share_type: row.share_type,
            permissions: row.permissions,
        }
    }
}

/// Row type for received share queries.
#[derive(FromRow)]
struct ExternalShareRow {
    share_token: String,
    remote_id: String,
    remote: String,
}

fn source(e: sqlx::Error) -> TransportError {
    TransportError::Source {
        details: e.to_string(),
    }
}

/// Repository over the host's share tables.
#[derive(Clone)]
pub struct PgShareSource {
    pool: PgPool,
}

impl PgShareSource {
    /// Creates a new host share repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShareSource for PgShareSource {
    async fn share(&self, id: FederatedGroupShareId) -> Result<HostShare, Report<TransportError>> {
        let row: Option<HostShareRow> = sqlx::query_as(
            r#"
            SELECT id, file_target, uid_owner, uid_initiator, share_with, share_type, permissions
            FROM host_shares
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(source)?;

        row.map(HostShare::from)
            .ok_or_else(|| TransportError::ShareNotFound { share_id: id }.into())
    }

    async fn user_exists(&self, uid: &str) -> Result<bool, Report<TransportError>> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM host_users WHERE uid = $1)")
                .bind(uid)
                .fetch_one(&self.pool)
                .await
                .map_err(source)?;

        Ok(exists)
    }

    async fn external_share(
        &self,
        share: &HostShare,
        owner: &str,
    ) -> Result<ExternalShare, Report<TransportError>> {
        let row: Option<ExternalShareRow> = sqlx::query_as(
            r#"
            SELECT share_token, remote_id, remote
            FROM host_share_external
            WHERE owner = $1 AND name = $2 AND accepted = 1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(owner)
        .bind(&share.node_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(source)?;

        let row = row.ok_or(TransportError::ShareNotFound { share_id: share.id })?;
        Ok(ExternalShare {
            token: row.share_token,
            remote_id: row.remote_id,
            remote: row.remote,
        })
    }

    async fn remote_id(&self, id: FederatedGroupShareId) -> Result<String, Report<TransportError>> {
        let remote_id: Option<String> =
            sqlx::query_scalar("SELECT remote_id FROM host_federated_reshares WHERE share_id = $1")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(source)?;

        remote_id.ok_or_else(|| TransportError::ShareNotFound { share_id: id }.into())
    }

    async fn store_remote_id(
        &self,
        id: FederatedGroupShareId,
        remote_id: &str,
    ) -> Result<(), Report<TransportError>> {
        sqlx::query(
            r#"
            INSERT INTO host_federated_reshares (share_id, remote_id)
            VALUES ($1, $2)
            ON CONFLICT (share_id) DO UPDATE SET remote_id = EXCLUDED.remote_id
            "#,
        )
        .bind(id.get())
        .bind(remote_id)
        .execute(&self.pool)
        .await
        .map_err(source)?;

        Ok(())
    }
}
