//! Share notification queue administration.

use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use vo_federation_core::ShareRowId;
use vo_federation_sharing::{FederatedShare, NewFederatedShare, NotificationAction};

/// Body of a notification change.
#[derive(Debug, Deserialize)]
pub struct PendingNotification {
    pub notification: NotificationAction,
}

/// Adds a queue row.
pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Json(share): Json<NewFederatedShare>,
) -> Result<(StatusCode, Json<FederatedShare>), ApiError> {
    let row = state.queue.enqueue(share).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// Schedules a notification on an existing row.
pub async fn set_pending(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Path(id): Path<ShareRowId>,
    Json(body): Json<PendingNotification>,
) -> Result<Json<FederatedShare>, ApiError> {
    Ok(Json(state.queue.set_pending(id, body.notification).await?))
}

/// Rows that are no longer retried.
pub async fn dead_letters(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<FederatedShare>>, ApiError> {
    Ok(Json(state.queue.dead_letters().await?))
}

/// Makes a row eligible for delivery again.
pub async fn requeue(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Path(id): Path<ShareRowId>,
) -> Result<Json<FederatedShare>, ApiError> {
    Ok(Json(state.queue.requeue(id).await?))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{ADMIN, USER, app, json, request, send};
    use axum::http::StatusCode;
    use vo_federation_sharing::ShareStore;

    const NEW_SHARE: &str = r#"{
        "federatedGroupShareId": 7,
        "instanceId": 1,
        "cloudId": "urn:x:g@partner.example",
        "notification": "share"
    }"#;

    #[tokio::test]
    async fn exhausted_rows_are_listed_and_requeued() {
        let app = app("https://cloud.example");

        let response = send(&app, request("POST", "/shares", Some(ADMIN), Some(NEW_SHARE))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = json(response).await["id"].as_i64().unwrap();

        let mut row = app.shares.rows()[0].clone();
        row.tries = 5;
        app.shares.update(&row).await.unwrap();

        let response = send(&app, request("GET", "/shares/dead-letters", Some(ADMIN), None)).await;
        let dead = json(response).await;
        assert_eq!(dead[0]["id"], id);
        assert_eq!(dead[0]["try"], 5);
        assert_eq!(dead[0]["notification"], "share");

        let response = send(
            &app,
            request("POST", &format!("/shares/{id}/requeue"), Some(ADMIN), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["try"], 0);

        let response = send(&app, request("GET", "/shares/dead-letters", Some(ADMIN), None)).await;
        assert_eq!(json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn set_pending_changes_action() {
        let app = app("https://cloud.example");
        send(&app, request("POST", "/shares", Some(ADMIN), Some(NEW_SHARE))).await;

        let response = send(
            &app,
            request(
                "PUT",
                "/shares/1/notification",
                Some(ADMIN),
                Some(r#"{"notification": "unshare"}"#),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["notification"], "unshare");
    }

    #[tokio::test]
    async fn unknown_row_and_non_admin_are_rejected() {
        let app = app("https://cloud.example");

        let response = send(&app, request("POST", "/shares/9/requeue", Some(ADMIN), None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, request("GET", "/shares/dead-letters", Some(USER), None)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
