//! The server's own group directory.

use async_trait::async_trait;
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use vo_federation_core::ProviderId;
use vo_federation_groups::{DirectoryError, Group, GroupDirectory, GroupUpsert};

/// Row type for group queries.
#[derive(FromRow)]
struct GroupRow {
    gid: String,
    displayname: String,
    provider_id: Option<i64>,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Self {
            gid: row.gid,
            display_name: row.displayname,
            provider_id: row.provider_id.map(ProviderId::new),
        }
    }
}

fn backend(e: sqlx::Error) -> DirectoryError {
    DirectoryError::Backend {
        details: e.to_string(),
    }
}

/// Repository for the `vo_groups` and `vo_group_user` tables.
#[derive(Clone)]
pub struct PgGroupDirectory {
    pool: PgPool,
}

impl PgGroupDirectory {
    /// Creates a new group repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupDirectory for PgGroupDirectory {
    async fn group(&self, gid: &str) -> Result<Option<Group>, Report<DirectoryError>> {
        let row: Option<GroupRow> =
            sqlx::query_as("SELECT gid, displayname, provider_id FROM vo_groups WHERE gid = $1")
                .bind(gid)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        Ok(row.map(Group::from))
    }

    async fn upsert_group(&self, group: &Group) -> Result<GroupUpsert, Report<DirectoryError>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let existing: Option<GroupRow> = sqlx::query_as(
            "SELECT gid, displayname, provider_id FROM vo_groups WHERE gid = $1 FOR UPDATE",
        )
        .bind(&group.gid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let outcome = match existing.map(Group::from) {
            Some(current) if current == *group => GroupUpsert::Unchanged,
            Some(_) => {
                sqlx::query("UPDATE vo_groups SET displayname = $2, provider_id = $3 WHERE gid = $1")
                    .bind(&group.gid)
                    .bind(&group.display_name)
                    .bind(group.provider_id.map(|id| id.get()))
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                GroupUpsert::Updated
            }
            None => {
                // A concurrent sync may have created the group since the read.
                sqlx::query(
                    r#"
                    INSERT INTO vo_groups (gid, displayname, provider_id)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (gid) DO UPDATE
                    SET displayname = EXCLUDED.displayname, provider_id = EXCLUDED.provider_id
                    "#,
                )
                .bind(&group.gid)
                .bind(&group.display_name)
                .bind(group.provider_id.map(|id| id.get()))
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
                GroupUpsert::Created
            }
        };

        tx.commit().await.map_err(backend)?;
        Ok(outcome)
    }

    async fn groups(&self) -> Result<Vec<Group>, Report<DirectoryError>> {
        let rows: Vec<GroupRow> =
            sqlx::query_as("SELECT gid, displayname, provider_id FROM vo_groups ORDER BY gid")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        Ok(rows.into_iter().map(Group::from).collect())
    }

    async fn user_groups(&self, uid: &str) -> Result<Vec<Group>, Report<DirectoryError>> {
        let rows: Vec<GroupRow> = sqlx::query_as(
            r#"
            SELECT g.gid, g.displayname, g.provider_id
            FROM vo_groups g
            JOIN vo_group_user m ON m.gid = g.gid
            WHERE m.uid = $1
            ORDER BY g.gid
            "#,
        )
        .bind(uid)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(Group::from).collect())
    }

    async fn group_members(&self, gid: &str) -> Result<Vec<String>, Report<DirectoryError>> {
        let members: Vec<String> =
            sqlx::query_scalar("SELECT uid FROM vo_group_user WHERE gid = $1 ORDER BY uid")
                .bind(gid)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        Ok(members)
    }

    async fn add_user(&self, gid: &str, uid: &str) -> Result<bool, Report<DirectoryError>> {
        let result = sqlx::query(
            r#"
            INSERT INTO vo_group_user (gid, uid)
            SELECT gid, $2 FROM vo_groups WHERE gid = $1
            ON CONFLICT (gid, uid) DO NOTHING
            "#,
        )
        .bind(gid)
        .bind(uid)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 && !self.group_exists(gid).await? {
            return Err(DirectoryError::GroupNotFound {
                gid: gid.to_string(),
            }
            .into());
        }
        Ok(result.rows_affected() > 0)
    }

    async fn remove_user(&self, gid: &str, uid: &str) -> Result<bool, Report<DirectoryError>> {
        let result = sqlx::query("DELETE FROM vo_group_user WHERE gid = $1 AND uid = $2")
            .bind(gid)
            .bind(uid)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }
}
