//! Shared application state.

use crate::config::ServerConfig;
use std::sync::Arc;
use vo_federation_core::HttpClient;
use vo_federation_groups::{GroupDirectory, GroupReconciler, ProviderLifecycle};
use vo_federation_identity::{
    LoginFlow, LoginUrls, ProviderRegistry, ProviderStore, SessionManager, SessionStore,
    VerificationConfig,
};
use vo_federation_sharing::{NotificationQueue, OcmNotifier, ShareSource, ShareStore};

/// The storage seams the services are built on.
pub struct Stores {
    pub providers: Arc<dyn ProviderStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub directory: Arc<dyn GroupDirectory>,
    pub shares: Arc<dyn ShareStore>,
    pub share_source: Arc<dyn ShareSource>,
}

/// Services shared by every request and the periodic sweep.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: ProviderRegistry,
    pub sessions: SessionManager,
    pub login: LoginFlow,
    pub reconciler: GroupReconciler,
    pub lifecycle: ProviderLifecycle,
    pub queue: NotificationQueue,
}

impl AppState {
    /// Wires the services. Group sync runs as the login flow's post-login
    /// hook; share notifications go out over OCM.
    pub fn new(
        config: ServerConfig,
        stores: Stores,
        http: Arc<dyn HttpClient>,
        verification: VerificationConfig,
    ) -> Self {
        let registry = ProviderRegistry::new(stores.providers, http.clone());
        let sessions = SessionManager::new(
            stores.sessions,
            registry.clone(),
            http.clone(),
            config.session.policy(),
        );
        let reconciler = GroupReconciler::new(
            registry.clone(),
            sessions.clone(),
            stores.directory,
            http.clone(),
        );
        let login = LoginFlow::new(
            registry.clone(),
            sessions.clone(),
            http.clone(),
            verification,
            LoginUrls {
                redirect_uri: config.redirect_uri(),
                completion_url: config.completion_url(),
            },
        )
        .with_hook(Arc::new(reconciler.clone()));
        let lifecycle = ProviderLifecycle::new(registry.clone(), sessions.clone(), reconciler.clone());
        let queue = NotificationQueue::new(
            stores.shares,
            stores.share_source,
            Arc::new(OcmNotifier::new(http)),
            config.queue.queue_config(),
            config.public_url.clone(),
        );

        Self {
            config,
            registry,
            sessions,
            login,
            reconciler,
            lifecycle,
            queue,
        }
    }
}
