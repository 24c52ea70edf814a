//! Reconciliation of provider-asserted groups with local memberships.
//!
//! A sync refreshes the user's access token, reads the groups claim from
//! the userinfo endpoint and then makes the user's memberships in groups
//! owned by that provider match the asserted list. Groups owned by other
//! providers, or by no provider, are never touched.

use crate::directory::{Group, GroupDirectory, GroupUpsert};
use crate::display::DisplayNamePattern;
use crate::error::{DirectoryError, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use rootcause::prelude::Report;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use vo_federation_core::http::bearer;
use vo_federation_core::{HttpClient, ProviderId};
use vo_federation_identity::{
    ClaimSet, EndpointKind, HookError, PostLoginHook, Provider, ProviderRegistry, RegistryError,
    Session, SessionError, SessionManager,
};

/// What a sync changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub provider_id: ProviderId,
    /// Groups created by this sync.
    pub created: Vec<String>,
    /// Groups whose display name or owner changed.
    pub updated: Vec<String>,
    /// Groups the user was added to.
    pub joined: Vec<String>,
    /// Groups the user was removed from.
    pub left: Vec<String>,
}

impl SyncReport {
    fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            created: Vec::new(),
            updated: Vec::new(),
            joined: Vec::new(),
            left: Vec::new(),
        }
    }
}

fn directory_failed(e: Report<DirectoryError>) -> SyncError {
    SyncError::Directory {
        details: e.to_string(),
    }
}

fn registry_failed(e: Report<RegistryError>) -> SyncError {
    match e.current_context() {
        RegistryError::NotFound { provider_id } => SyncError::ProviderNotFound {
            provider_id: *provider_id,
        },
        RegistryError::MissingEndpoint { endpoint, .. } => SyncError::MissingEndpoint {
            endpoint: *endpoint,
        },
        RegistryError::DiscoveryFailed { .. } => SyncError::UserinfoUnavailable {
            details: e.to_string(),
        },
        _ => SyncError::Session {
            details: e.to_string(),
        },
    }
}

fn session_failed(e: Report<SessionError>) -> SyncError {
    match e.current_context() {
        SessionError::NotFound { uid, provider_id } => SyncError::SessionNotFound {
            uid: uid.clone(),
            provider_id: *provider_id,
        },
        SessionError::ProviderNotFound { provider_id } => SyncError::ProviderNotFound {
            provider_id: *provider_id,
        },
        SessionError::MissingEndpoint { endpoint } => SyncError::MissingEndpoint {
            endpoint: *endpoint,
        },
        SessionError::RefreshFailed { .. } | SessionError::RefreshRejected { .. } => {
            SyncError::RefreshFailed {
                details: e.to_string(),
            }
        }
        _ => SyncError::Session {
            details: e.to_string(),
        },
    }
}

/// Keeps directory memberships in line with provider group claims.
#[derive(Clone)]
pub struct GroupReconciler {
    registry: ProviderRegistry,
    sessions: SessionManager,
    directory: Arc<dyn GroupDirectory>,
    http: Arc<dyn HttpClient>,
}

impl GroupReconciler {
    /// Creates a reconciler.
    pub fn new(
        registry: ProviderRegistry,
        sessions: SessionManager,
        directory: Arc<dyn GroupDirectory>,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            registry,
            sessions,
            directory,
            http,
        }
    }

    /// Synchronises `uid`'s groups from `provider_id`.
    ///
    /// The session's display name and sync timestamp are saved as soon as
    /// userinfo has been read, before any membership changes. A failure
    /// while refreshing or fetching userinfo changes nothing.
    #[instrument(skip_all, fields(uid = %uid, provider_id = %provider_id))]
    pub async fn sync_user(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<SyncReport, Report<SyncError>> {
        let provider = self.registry.get(provider_id).await.map_err(registry_failed)?;
        let session = self
            .sessions
            .get(uid, provider_id)
            .await
            .map_err(session_failed)?;

        let session = self
            .sessions
            .refresh_access_token(session)
            .await
            .map_err(session_failed)?;
        let userinfo = self.fetch_userinfo(&provider, &session).await?;

        let display_name = userinfo
            .string(&provider.claims.display_name_claim)
            .map(str::to_string);
        let asserted = userinfo.strings(&provider.claims.groups_claim);

        self.sessions
            .record_sync(session, display_name, Utc::now())
            .await
            .map_err(session_failed)?;

        let report = self.reconcile(uid, &provider, asserted).await?;
        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            joined = report.joined.len(),
            left = report.left.len(),
            "groups synchronised"
        );
        Ok(report)
    }

    async fn fetch_userinfo(
        &self,
        provider: &Provider,
        session: &Session,
    ) -> Result<ClaimSet, Report<SyncError>> {
        let endpoint = self
            .registry
            .endpoint(provider, EndpointKind::Userinfo)
            .await
            .map_err(registry_failed)?;
        let unavailable = |details: String| SyncError::UserinfoUnavailable { details };

        debug!("fetching userinfo endpoint");
        let response = self
            .http
            .get(&endpoint, &[bearer(&session.access_token)])
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !response.is_success() {
            return Err(unavailable(format!("status {}", response.status)).into());
        }
        let value: serde_json::Value = response
            .json()
            .map_err(|e| unavailable(e.to_string()))?;
        Ok(ClaimSet::from_value(value)
            .ok_or_else(|| unavailable("userinfo is not a JSON object".to_string()))?)
    }

    async fn reconcile(
        &self,
        uid: &str,
        provider: &Provider,
        asserted: Vec<String>,
    ) -> Result<SyncReport, Report<SyncError>> {
        let pattern = DisplayNamePattern::lenient(&provider.claims.groups_regex);
        let mut report = SyncReport::new(provider.id);

        let mut remaining: BTreeSet<String> = self
            .directory
            .user_groups(uid)
            .await
            .map_err(directory_failed)?
            .into_iter()
            .filter(|group| group.provider_id.is_some())
            .map(|group| group.gid)
            .collect();

        let mut seen = BTreeSet::new();
        for gid in asserted {
            if !seen.insert(gid.clone()) {
                continue;
            }
            let group = Group {
                display_name: pattern.display_name(&gid),
                gid: gid.clone(),
                provider_id: Some(provider.id),
            };
            match self
                .directory
                .upsert_group(&group)
                .await
                .map_err(directory_failed)?
            {
                GroupUpsert::Created => report.created.push(gid.clone()),
                GroupUpsert::Updated => report.updated.push(gid.clone()),
                GroupUpsert::Unchanged => {}
            }
            if self
                .directory
                .add_user(&gid, uid)
                .await
                .map_err(directory_failed)?
            {
                report.joined.push(gid.clone());
            }
            remaining.remove(&gid);
        }

        for gid in remaining {
            let owner = self
                .directory
                .provider_id(&gid)
                .await
                .map_err(directory_failed)?;
            if owner != Some(provider.id) {
                continue;
            }
            if self
                .directory
                .remove_user(&gid, uid)
                .await
                .map_err(directory_failed)?
            {
                report.left.push(gid);
            }
        }

        Ok(report)
    }

    /// Synchronises every provider `uid` holds a session for.
    ///
    /// Failures are logged per provider and do not stop the others.
    #[instrument(skip(self))]
    pub async fn sync_all_sessions(&self, uid: &str) -> Result<Vec<SyncReport>, Report<SyncError>> {
        let sessions = self
            .sessions
            .list_for_user(uid)
            .await
            .map_err(session_failed)?;

        let mut reports = Vec::with_capacity(sessions.len());
        for session in sessions {
            match self.sync_user(uid, session.provider_id).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(provider_id = %session.provider_id, error = %e, "group sync failed");
                }
            }
        }
        Ok(reports)
    }

    /// Recomputes the display name of every group owned by `provider`.
    /// Memberships are left alone. Returns the number of renamed groups.
    #[instrument(skip(self, provider), fields(provider_id = %provider.id))]
    pub async fn update_all_provider_groups(
        &self,
        provider: &Provider,
    ) -> Result<usize, Report<DirectoryError>> {
        let pattern = DisplayNamePattern::lenient(&provider.claims.groups_regex);
        let mut renamed = 0;
        for group in self.owned_groups(provider.id).await? {
            let display_name = pattern.display_name(&group.gid);
            if display_name == group.display_name {
                continue;
            }
            self.directory
                .upsert_group(&Group {
                    display_name,
                    ..group
                })
                .await?;
            renamed += 1;
        }
        debug!(renamed, "provider groups renamed");
        Ok(renamed)
    }

    /// Removes every member from every group owned by `provider_id`. The
    /// groups themselves stay. Returns the number of removed memberships.
    #[instrument(skip(self))]
    pub async fn remove_all_provider_memberships(
        &self,
        provider_id: ProviderId,
    ) -> Result<usize, Report<DirectoryError>> {
        let mut removed = 0;
        for group in self.owned_groups(provider_id).await? {
            for uid in self.directory.group_members(&group.gid).await? {
                if self.directory.remove_user(&group.gid, &uid).await? {
                    removed += 1;
                }
            }
        }
        info!(removed, "provider memberships removed");
        Ok(removed)
    }

    /// Removes the session's user from every group owned by the session's
    /// provider. Returns the number of removed memberships.
    #[instrument(skip(self, session), fields(uid = %session.uid, provider_id = %session.provider_id))]
    pub async fn remove_all_session_memberships(
        &self,
        session: &Session,
    ) -> Result<usize, Report<DirectoryError>> {
        let mut removed = 0;
        for group in self.directory.user_groups(&session.uid).await? {
            if group.provider_id != Some(session.provider_id) {
                continue;
            }
            if self.directory.remove_user(&group.gid, &session.uid).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn owned_groups(
        &self,
        provider_id: ProviderId,
    ) -> Result<Vec<Group>, Report<DirectoryError>> {
        Ok(self
            .directory
            .groups()
            .await?
            .into_iter()
            .filter(|group| group.provider_id == Some(provider_id))
            .collect())
    }
}

#[async_trait]
impl PostLoginHook for GroupReconciler {
    async fn on_login_succeeded(
        &self,
        uid: &str,
        provider: &Provider,
    ) -> Result<(), Report<HookError>> {
        self.sync_user(uid, provider.id)
            .await
            .map(|_| ())
            .map_err(|e| {
                HookError {
                    details: e.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryGroupDirectory;
    use serde_json::json;
    use vo_federation_core::MockHttpClient;
    use vo_federation_identity::{
        ClaimMapping, InMemoryProviderStore, InMemorySessionStore, NewProvider, ProviderSettings,
        SessionPolicy, SessionUpsert,
    };

    const TOKEN_URL: &str = "https://idp.example/token";
    const USERINFO_URL: &str = "https://idp.example/userinfo";

    struct Fixture {
        reconciler: GroupReconciler,
        directory: InMemoryGroupDirectory,
        sessions: SessionManager,
        http: Arc<MockHttpClient>,
        provider: Provider,
    }

    async fn fixture() -> Fixture {
        let http = Arc::new(MockHttpClient::new());
        let registry = ProviderRegistry::new(Arc::new(InMemoryProviderStore::new()), http.clone());
        let provider = registry
            .create(NewProvider {
                identifier: "aai".to_string(),
                client_id: "nc".to_string(),
                client_secret: "secret".to_string(),
                discovery_endpoint: None,
                scope: "openid".to_string(),
                claims: ClaimMapping {
                    groups_regex: "^vo:(.*)$".to_string(),
                    ..ClaimMapping::default()
                },
                settings: ProviderSettings {
                    token_endpoint: Some(TOKEN_URL.to_string()),
                    userinfo_endpoint: Some(USERINFO_URL.to_string()),
                    ..ProviderSettings::default()
                },
                trusted_instances: Vec::new(),
            })
            .await
            .expect("provider");
        let sessions = SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            registry.clone(),
            http.clone(),
            SessionPolicy::default(),
        );
        sessions
            .create_or_update(SessionUpsert {
                uid: "alice".to_string(),
                provider_id: provider.id,
                id_token: "id".to_string(),
                id_token_sub: "alice@idp".to_string(),
                id_token_exp: 0,
                access_token: "stale".to_string(),
                access_token_exp: 0,
                refresh_token: "refresh".to_string(),
                refresh_token_exp: 0,
                userinfo_display_name: Some("Old Name".to_string()),
                last_sync: None,
            })
            .await
            .expect("session");
        let directory = InMemoryGroupDirectory::new();
        let reconciler = GroupReconciler::new(
            registry,
            sessions.clone(),
            Arc::new(directory.clone()),
            http.clone(),
        );
        Fixture {
            reconciler,
            directory,
            sessions,
            http,
            provider,
        }
    }

    fn serve(f: &Fixture, userinfo: serde_json::Value) {
        f.http.respond_json(
            "POST",
            TOKEN_URL,
            200,
            &json!({"access_token": "fresh", "expires_in": 300}),
        );
        f.http.respond_json("GET", USERINFO_URL, 200, &userinfo);
    }

    async fn seed(f: &Fixture, gid: &str, owner: Option<ProviderId>, members: &[&str]) {
        f.directory
            .upsert_group(&Group {
                gid: gid.to_string(),
                display_name: gid.to_string(),
                provider_id: owner,
            })
            .await
            .expect("group");
        for uid in members {
            f.directory.add_user(gid, uid).await.expect("member");
        }
    }

    async fn groups_of(f: &Fixture, uid: &str) -> Vec<String> {
        f.directory
            .user_groups(uid)
            .await
            .expect("groups")
            .into_iter()
            .map(|g| g.gid)
            .collect()
    }

    #[tokio::test]
    async fn sync_converges_on_asserted_groups() {
        let f = fixture().await;
        let other = Some(ProviderId::new(99));
        seed(&f, "vo:B", Some(f.provider.id), &["alice"]).await;
        seed(&f, "vo:C", Some(f.provider.id), &["alice"]).await;
        seed(&f, "vo:D", other, &["alice"]).await;
        serve(&f, json!({"name": "Alice", "groups": ["vo:A", "vo:B"]}));

        let report = f
            .reconciler
            .sync_user("alice", f.provider.id)
            .await
            .expect("sync");

        assert_eq!(groups_of(&f, "alice").await, vec!["vo:A", "vo:B", "vo:D"]);
        assert_eq!(report.created, vec!["vo:A"]);
        assert_eq!(report.joined, vec!["vo:A"]);
        assert_eq!(report.left, vec!["vo:C"]);
        assert_eq!(report.updated, vec!["vo:B"]);

        let a = f.directory.group("vo:A").await.expect("get").expect("exists");
        assert_eq!(a.display_name, "A");
        assert_eq!(a.provider_id, Some(f.provider.id));
        assert!(f.directory.group_exists("vo:C").await.expect("exists"));
        assert_eq!(
            f.directory.provider_id("vo:D").await.expect("owner"),
            other
        );
    }

    #[tokio::test]
    async fn sync_uses_refreshed_token_and_records_sync() {
        let f = fixture().await;
        serve(&f, json!({"name": "Alice Example", "groups": []}));

        f.reconciler
            .sync_user("alice", f.provider.id)
            .await
            .expect("sync");

        let userinfo_call = f
            .http
            .calls()
            .into_iter()
            .find(|c| c.url == USERINFO_URL)
            .expect("userinfo call");
        assert_eq!(userinfo_call.header("authorization"), Some("Bearer fresh"));

        let session = f.sessions.get("alice", f.provider.id).await.expect("session");
        assert_eq!(session.userinfo_display_name.as_deref(), Some("Alice Example"));
        assert!(session.last_sync.is_some());
    }

    #[tokio::test]
    async fn missing_name_keeps_previous_and_missing_groups_leave_all() {
        let f = fixture().await;
        seed(&f, "vo:B", Some(f.provider.id), &["alice"]).await;
        serve(&f, json!({"sub": "alice@idp"}));

        let report = f
            .reconciler
            .sync_user("alice", f.provider.id)
            .await
            .expect("sync");
        assert_eq!(report.left, vec!["vo:B"]);

        let session = f.sessions.get("alice", f.provider.id).await.expect("session");
        assert_eq!(session.userinfo_display_name.as_deref(), Some("Old Name"));
    }

    #[tokio::test]
    async fn userinfo_failure_changes_nothing() {
        let f = fixture().await;
        seed(&f, "vo:B", Some(f.provider.id), &["alice"]).await;
        f.http.respond_json(
            "POST",
            TOKEN_URL,
            200,
            &json!({"access_token": "fresh"}),
        );
        f.http.fail("GET", USERINFO_URL);

        let err = f
            .reconciler
            .sync_user("alice", f.provider.id)
            .await
            .expect_err("unreachable");
        assert!(matches!(
            err.current_context(),
            SyncError::UserinfoUnavailable { .. }
        ));
        assert_eq!(groups_of(&f, "alice").await, vec!["vo:B"]);
        let session = f.sessions.get("alice", f.provider.id).await.expect("session");
        assert!(session.last_sync.is_none());
    }

    #[tokio::test]
    async fn refresh_failure_aborts_before_userinfo() {
        let f = fixture().await;
        f.http.respond_json("POST", TOKEN_URL, 400, &json!({"error": "invalid_grant"}));

        let err = f
            .reconciler
            .sync_user("alice", f.provider.id)
            .await
            .expect_err("refresh");
        assert!(matches!(err.current_context(), SyncError::RefreshFailed { .. }));
        assert_eq!(f.http.calls_to(USERINFO_URL), 0);
    }

    #[tokio::test]
    async fn update_all_provider_groups_only_renames() {
        let f = fixture().await;
        seed(&f, "vo:A", Some(f.provider.id), &["alice"]).await;
        seed(&f, "vo:Z", Some(ProviderId::new(99)), &[]).await;

        let renamed = f
            .reconciler
            .update_all_provider_groups(&f.provider)
            .await
            .expect("rename");
        assert_eq!(renamed, 1);
        assert_eq!(
            f.directory.group("vo:A").await.expect("get").expect("exists").display_name,
            "A"
        );
        assert_eq!(
            f.directory.group("vo:Z").await.expect("get").expect("exists").display_name,
            "vo:Z"
        );
        assert_eq!(groups_of(&f, "alice").await, vec!["vo:A"]);
    }

    #[tokio::test]
    async fn membership_removal_is_scoped() {
        let f = fixture().await;
        seed(&f, "vo:A", Some(f.provider.id), &["alice", "bob"]).await;
        seed(&f, "vo:Z", Some(ProviderId::new(99)), &["alice"]).await;
        seed(&f, "local", None, &["alice"]).await;

        let session = f.sessions.get("alice", f.provider.id).await.expect("session");
        assert_eq!(
            f.reconciler
                .remove_all_session_memberships(&session)
                .await
                .expect("remove"),
            1
        );
        assert_eq!(groups_of(&f, "bob").await, vec!["vo:A"]);

        assert_eq!(
            f.reconciler
                .remove_all_provider_memberships(f.provider.id)
                .await
                .expect("remove"),
            1
        );
        assert!(groups_of(&f, "bob").await.is_empty());
        assert_eq!(groups_of(&f, "alice").await, vec!["local", "vo:Z"]);
        assert!(f.directory.group_exists("vo:A").await.expect("exists"));
    }

    #[tokio::test]
    async fn sync_all_sessions_skips_failures() {
        let f = fixture().await;
        serve(&f, json!({"groups": ["vo:A"]}));
        let reports = f.reconciler.sync_all_sessions("alice").await.expect("sync");
        assert_eq!(reports.len(), 1);

        f.http.fail("POST", TOKEN_URL);
        let reports = f.reconciler.sync_all_sessions("alice").await.expect("sync");
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn hook_reports_sync_failure() {
        let f = fixture().await;
        f.http.fail("POST", TOKEN_URL);
        assert!(
            f.reconciler
                .on_login_succeeded("alice", &f.provider)
                .await
                .is_err()
        );
    }
}
