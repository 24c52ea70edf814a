//! OIDC sessions.

use super::backend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use vo_federation_core::{ProviderId, SessionId, StoreError};
use vo_federation_identity::{Session, SessionStore, SessionUpsert};

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: i64,
    uid: String,
    provider_id: i64,
    id_token: String,
    id_token_sub: String,
    id_token_exp: i64,
    access_token: String,
    access_token_exp: i64,
    refresh_token: String,
    refresh_token_exp: i64,
    userinfo_display_name: Option<String>,
    last_sync: Option<DateTime<Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: SessionId::new(row.id),
            uid: row.uid,
            provider_id: ProviderId::new(row.provider_id),
            id_token: row.id_token,
            id_token_sub: row.id_token_sub,
            id_token_exp: row.id_token_exp,
            access_token: row.access_token,
            access_token_exp: row.access_token_exp,
            refresh_token: row.refresh_token,
            refresh_token_exp: row.refresh_token_exp,
            userinfo_display_name: row.userinfo_display_name,
            last_sync: row.last_sync,
        }
    }
}

/// Repository for the `oidc_sessions` table.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Creates a new session repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn upsert(&self, upsert: &SessionUpsert) -> Result<Session, Report<StoreError>> {
        // Display name and sync time only overwrite when given.
        let row: SessionRow = sqlx::query_as(
            r#"
            INSERT INTO oidc_sessions (uid, provider_id, id_token, id_token_sub, id_token_exp,
                                       access_token, access_token_exp, refresh_token,
                                       refresh_token_exp, userinfo_display_name, last_sync)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (uid, provider_id) DO UPDATE SET
                id_token = EXCLUDED.id_token,
                id_token_sub = EXCLUDED.id_token_sub,
                id_token_exp = EXCLUDED.id_token_exp,
                access_token = EXCLUDED.access_token,
                access_token_exp = EXCLUDED.access_token_exp,
                refresh_token = EXCLUDED.refresh_token,
                refresh_token_exp = EXCLUDED.refresh_token_exp,
                userinfo_display_name = COALESCE(EXCLUDED.userinfo_display_name,
                                                 oidc_sessions.userinfo_display_name),
                last_sync = COALESCE(EXCLUDED.last_sync, oidc_sessions.last_sync)
            RETURNING *
            "#,
        )
        .bind(&upsert.uid)
        .bind(upsert.provider_id.get())
        .bind(&upsert.id_token)
        .bind(&upsert.id_token_sub)
        .bind(upsert.id_token_exp)
        .bind(&upsert.access_token)
        .bind(upsert.access_token_exp)
        .bind(&upsert.refresh_token)
        .bind(upsert.refresh_token_exp)
        .bind(&upsert.userinfo_display_name)
        .bind(upsert.last_sync)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.into())
    }

    async fn find(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Option<Session>, Report<StoreError>> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM oidc_sessions WHERE uid = $1 AND provider_id = $2")
                .bind(uid)
                .bind(provider_id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        Ok(row.map(Session::from))
    }

    async fn list_for_user(&self, uid: &str) -> Result<Vec<Session>, Report<StoreError>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM oidc_sessions WHERE uid = $1 ORDER BY provider_id")
                .bind(uid)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn update(&self, session: &Session) -> Result<Session, Report<StoreError>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            UPDATE oidc_sessions
            SET id_token = $2, id_token_sub = $3, id_token_exp = $4, access_token = $5,
                access_token_exp = $6, refresh_token = $7, refresh_token_exp = $8,
                userinfo_display_name = $9, last_sync = $10
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(session.id.get())
        .bind(&session.id_token)
        .bind(&session.id_token_sub)
        .bind(session.id_token_exp)
        .bind(&session.access_token)
        .bind(session.access_token_exp)
        .bind(&session.refresh_token)
        .bind(session.refresh_token_exp)
        .bind(&session.userinfo_display_name)
        .bind(session.last_sync)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Session::from).ok_or_else(|| {
            StoreError::Backend {
                details: format!("session {} does not exist", session.id),
            }
            .into()
        })
    }

    async fn delete(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Option<Session>, Report<StoreError>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "DELETE FROM oidc_sessions WHERE uid = $1 AND provider_id = $2 RETURNING *",
        )
        .bind(uid)
        .bind(provider_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(Session::from))
    }

    async fn delete_for_provider(
        &self,
        provider_id: ProviderId,
    ) -> Result<u64, Report<StoreError>> {
        let result = sqlx::query("DELETE FROM oidc_sessions WHERE provider_id = $1")
            .bind(provider_id.get())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected())
    }
}
