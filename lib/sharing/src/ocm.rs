//! Open Cloud Mesh delivery of share notifications.

use crate::cloud_id::normalize_remote_url;
use crate::error::TransportError;
use crate::transport::{RemoteNotifier, ReshareGrant, ReshareRequest, ShareOffer};
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};
use vo_federation_core::HttpClient;

const SHARES_PATH: &str = "/ocm/shares";
const NOTIFICATIONS_PATH: &str = "/ocm/notifications";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReshareResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    provider_id: Option<serde_json::Value>,
}

/// Sends share notifications to the OCM endpoints of partner instances.
#[derive(Clone)]
pub struct OcmNotifier {
    http: Arc<dyn HttpClient>,
}

impl OcmNotifier {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    async fn post(
        &self,
        remote: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<vo_federation_core::HttpResponse, Report<TransportError>> {
        let url = format!("{}{}", base_url(remote), path);
        debug!(url = %url, "sending OCM request");
        self.http
            .post_json(&url, body, &[])
            .await
            .map_err(|e| {
                TransportError::Unreachable {
                    remote: remote.to_string(),
                    details: e.to_string(),
                }
                .into()
            })
    }
}

/// The base URL of a partner, assuming https when no scheme is given.
fn base_url(remote: &str) -> String {
    let remote = normalize_remote_url(remote);
    if remote.starts_with("http://") || remote.starts_with("https://") {
        remote
    } else {
        format!("https://{}", remote)
    }
}

#[async_trait]
impl RemoteNotifier for OcmNotifier {
    #[instrument(skip(self, offer), fields(share_with = %offer.share_with))]
    async fn send_share(&self, offer: &ShareOffer) -> Result<bool, Report<TransportError>> {
        let Some((_, remote)) = offer.share_with.rsplit_once('@') else {
            return Ok(false);
        };
        let body = json!({
            "shareWith": offer.share_with,
            "name": offer.name,
            "providerId": offer.provider_id.to_string(),
            "owner": offer.owner_cloud_id,
            "ownerDisplayName": offer.owner,
            "sender": offer.shared_by_cloud_id,
            "senderDisplayName": offer.shared_by,
            "shareType": "group",
            "resourceType": "file",
            "protocol": {
                "name": "webdav",
                "options": {
                    "sharedSecret": offer.token,
                    "permissions": "{http://open-cloud-mesh.org/ns}share-permissions",
                },
            },
        });
        let response = self.post(remote, SHARES_PATH, &body).await?;
        Ok(response.is_success())
    }

    #[instrument(skip(self, token))]
    async fn send_unshare(
        &self,
        remote: &str,
        id: &str,
        token: &str,
    ) -> Result<bool, Report<TransportError>> {
        let body = json!({
            "notificationType": "SHARE_UNSHARED",
            "resourceType": "file",
            "providerId": id,
            "notification": {
                "sharedSecret": token,
                "message": "file is no longer shared with you",
            },
        });
        let response = self.post(remote, NOTIFICATIONS_PATH, &body).await?;
        Ok(response.is_success())
    }

    #[instrument(skip(self, request), fields(remote = %request.remote, share_with = %request.share_with))]
    async fn request_reshare(
        &self,
        request: &ReshareRequest,
    ) -> Result<Option<ReshareGrant>, Report<TransportError>> {
        let body = json!({
            "notificationType": "REQUEST_RESHARE",
            "resourceType": "file",
            "providerId": request.remote_id,
            "notification": {
                "sharedSecret": request.token,
                "shareWith": request.share_with,
                "senderId": request.share_id.to_string(),
                "sender": request.shared_by,
                "shareType": "group",
                "permission": request.permissions,
                "name": request.name,
            },
        });
        let response = self
            .post(&request.remote, NOTIFICATIONS_PATH, &body)
            .await?;
        if !response.is_success() {
            return Err(TransportError::Rejected {
                remote: request.remote.clone(),
                status: response.status,
            }
            .into());
        }

        let Ok(parsed) = response.json::<ReshareResponse>() else {
            return Ok(None);
        };
        let remote_id = match parsed.provider_id {
            Some(serde_json::Value::String(id)) => id,
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => String::new(),
        };
        Ok(parsed
            .token
            .filter(|token| !token.is_empty())
            .map(|token| ReshareGrant { token, remote_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vo_federation_core::{FederatedGroupShareId, MockHttpClient};

    fn notifier() -> (OcmNotifier, Arc<MockHttpClient>) {
        let http = Arc::new(MockHttpClient::new());
        (OcmNotifier::new(http.clone()), http)
    }

    fn request() -> ReshareRequest {
        ReshareRequest {
            token: "incoming-token".to_string(),
            remote_id: "55".to_string(),
            share_id: FederatedGroupShareId::new(7),
            remote: "owner.example".to_string(),
            shared_by: "alice".to_string(),
            share_with: "urn:x:g@partner.example".to_string(),
            permissions: 19,
            name: "report.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn share_goes_to_recipient_instance() {
        let (notifier, http) = notifier();
        http.respond_json("POST", "https://partner.example/ocm/shares", 201, &json!({}));

        let sent = notifier
            .send_share(&ShareOffer {
                token: "tok".to_string(),
                share_with: "urn:x:g@partner.example".to_string(),
                name: "report.pdf".to_string(),
                provider_id: FederatedGroupShareId::new(7),
                owner: "alice".to_string(),
                owner_cloud_id: "alice@cloud.example".to_string(),
                shared_by: "alice".to_string(),
                shared_by_cloud_id: "alice@cloud.example".to_string(),
                share_type: 14,
            })
            .await
            .expect("send");
        assert!(sent);

        let call = &http.calls()[0];
        let body = call.json.as_ref().expect("json body");
        assert_eq!(body["shareWith"], "urn:x:g@partner.example");
        assert_eq!(body["providerId"], "7");
        assert_eq!(body["protocol"]["options"]["sharedSecret"], "tok");
    }

    #[tokio::test]
    async fn unshare_rejection_is_false_and_transport_failure_is_error() {
        let (notifier, http) = notifier();
        http.respond_json(
            "POST",
            "http://partner.example/ocm/notifications",
            403,
            &json!({"message": "forbidden"}),
        );
        assert!(
            !notifier
                .send_unshare("http://partner.example/", "7", "tok")
                .await
                .expect("answered")
        );

        let err = notifier
            .send_unshare("down.example", "7", "tok")
            .await
            .expect_err("unreachable");
        assert!(matches!(
            err.current_context(),
            TransportError::Unreachable { .. }
        ));
    }

    #[tokio::test]
    async fn reshare_grant_requires_token() {
        let (notifier, http) = notifier();
        let url = "https://owner.example/ocm/notifications";

        http.respond_json("POST", url, 201, &json!({"token": "new", "providerId": 99}));
        assert_eq!(
            notifier.request_reshare(&request()).await.expect("grant"),
            Some(ReshareGrant {
                token: "new".to_string(),
                remote_id: "99".to_string(),
            })
        );

        http.respond_json("POST", url, 201, &json!({"token": "", "providerId": "99"}));
        assert_eq!(notifier.request_reshare(&request()).await.expect("none"), None);

        http.respond_json("POST", url, 503, &json!({}));
        let err = notifier
            .request_reshare(&request())
            .await
            .expect_err("rejected");
        assert_eq!(
            err.current_context(),
            &TransportError::Rejected {
                remote: "owner.example".to_string(),
                status: 503,
            }
        );
    }
}
