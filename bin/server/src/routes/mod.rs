//! HTTP routes.

pub mod login;
pub mod providers;
pub mod shares;

use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Provider administration
        .route("/providers", get(providers::list))
        .route("/provider", post(providers::create))
        .route(
            "/provider/{id}",
            put(providers::update).delete(providers::remove),
        )
        .route("/provider/{id}/logout", post(providers::logout))
        .route("/sessions", get(providers::sessions))
        // Login and group sync
        .route("/login/{provider_id}", get(login::login))
        .route("/code", get(login::callback))
        .route("/sync", post(login::sync))
        // Share notification queue
        .route("/shares", post(shares::enqueue))
        .route("/shares/dead-letters", get(shares::dead_letters))
        .route("/shares/{id}/notification", put(shares::set_pending))
        .route("/shares/{id}/requeue", post(shares::requeue))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::{HttpConfig, JwtConfig, QueueSettings, ServerConfig, SessionConfig};
    use crate::state::{AppState, Stores};
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, Response},
    };
    use rootcause::prelude::Report;
    use std::sync::Arc;
    use tower::ServiceExt;
    use vo_federation_core::{FederatedGroupShareId, MockHttpClient};
    use vo_federation_groups::InMemoryGroupDirectory;
    use vo_federation_identity::{InMemoryProviderStore, InMemorySessionStore, VerificationConfig};
    use vo_federation_sharing::{
        ExternalShare, HostShare, InMemoryShareStore, ShareSource, TransportError,
    };

    pub const ADMIN: &str = "admin";
    pub const USER: &str = "alice";

    /// A host without any shares.
    struct EmptyShareSource;

    #[async_trait]
    impl ShareSource for EmptyShareSource {
        async fn share(
            &self,
            id: FederatedGroupShareId,
        ) -> Result<HostShare, Report<TransportError>> {
            Err(TransportError::ShareNotFound { share_id: id }.into())
        }

        async fn user_exists(&self, _uid: &str) -> Result<bool, Report<TransportError>> {
            Ok(false)
        }

        async fn external_share(
            &self,
            share: &HostShare,
            _owner: &str,
        ) -> Result<ExternalShare, Report<TransportError>> {
            Err(TransportError::ShareNotFound { share_id: share.id }.into())
        }

        async fn remote_id(
            &self,
            id: FederatedGroupShareId,
        ) -> Result<String, Report<TransportError>> {
            Err(TransportError::ShareNotFound { share_id: id }.into())
        }

        async fn store_remote_id(
            &self,
            _id: FederatedGroupShareId,
            _remote_id: &str,
        ) -> Result<(), Report<TransportError>> {
            Ok(())
        }
    }

    pub struct TestApp {
        pub router: Router,
        pub http: Arc<MockHttpClient>,
        pub shares: InMemoryShareStore,
    }

    pub fn app(public_url: &str) -> TestApp {
        let config = ServerConfig {
            database_url: "postgres://localhost/vo".to_string(),
            public_url: public_url.to_string(),
            listen_addr: "127.0.0.1:0".to_string(),
            completion_path: "/settings/user/vo_federation".to_string(),
            secure_cookies: true,
            user_header: "x-remote-user".to_string(),
            admin_users: vec![ADMIN.to_string()],
            http: HttpConfig::default(),
            jwt: JwtConfig::default(),
            session: SessionConfig::default(),
            queue: QueueSettings::default(),
        };
        let http = Arc::new(MockHttpClient::new());
        let shares = InMemoryShareStore::new();
        let stores = Stores {
            providers: Arc::new(InMemoryProviderStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            directory: Arc::new(InMemoryGroupDirectory::new()),
            shares: Arc::new(shares.clone()),
            share_source: Arc::new(EmptyShareSource),
        };
        let state = AppState::new(config, stores, http.clone(), VerificationConfig::default());
        TestApp {
            router: super::router(Arc::new(state)),
            http,
            shares,
        }
    }

    pub fn request(method: &str, uri: &str, uid: Option<&str>, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(uid) = uid {
            builder = builder.header("x-remote-user", uid);
        }
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    pub async fn send(app: &TestApp, request: Request<Body>) -> Response<Body> {
        app.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn json(response: Response<Body>) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
