//! OIDC authorization-code login.
//!
//! [`LoginFlow::begin_login`] builds the redirect to the provider and a
//! [`PendingLogin`] the caller keeps in the browser session.
//! [`LoginFlow::handle_callback`] consumes that pending login and runs the
//! callback stages strictly in order, each one short-circuiting:
//!
//! 1. provider error parameters
//! 2. state comparison (before any network call)
//! 3. provider reload
//! 4. code exchange
//! 5. key set fetch
//! 6. signature verification
//! 7. expiry
//! 8. audience
//! 9. nonce
//! 10. subject extraction
//!
//! The session is then persisted and the post-login hook runs. Hook
//! failures are logged and never fail the login.

use crate::claims::ClaimSet;
use crate::error::{HookError, LoginError, RegistryError, SessionError, TokenError};
use crate::registry::{EndpointKind, Provider, ProviderRegistry};
use crate::session::{Session, SessionManager, SessionUpsert};
use crate::token::{KeySet, VerificationConfig, verify_id_token};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};
use url::Url;
use vo_federation_core::{HttpClient, ProviderId};

/// Length of generated `state` and `nonce` values.
pub const STATE_LENGTH: usize = 50;

const STATE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Query string appended to the completion URL after a successful login.
pub const COMPLETION_SUFFIX: &str = "?aaiToken=success#vo_federation_prefs";

/// Progress of a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    Initiated,
    CallbackReceived,
    TokenExchanged,
    IdTokenValidated,
    SessionPersisted,
    GroupsSynced,
    Failed,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initiated => "initiated",
            Self::CallbackReceived => "callback_received",
            Self::TokenExchanged => "token_exchanged",
            Self::IdTokenValidated => "id_token_validated",
            Self::SessionPersisted => "session_persisted",
            Self::GroupsSynced => "groups_synced",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State kept in the browser session between redirect and callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub state: String,
    pub nonce: String,
    pub provider_id: ProviderId,
}

/// Facts about the inbound request the flow depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Whether the request arrived over a secure transport.
    pub secure: bool,
}

/// The redirect to the provider and the pending login to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    pub authorization_url: String,
    pub pending: PendingLogin,
}

/// Query parameters of the provider's callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

/// Result of a completed login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    /// Where to send the browser.
    pub redirect_url: String,
    /// The stored session.
    pub session: Session,
    /// [`LoginStage::GroupsSynced`] if the post-login hook succeeded,
    /// [`LoginStage::SessionPersisted`] otherwise.
    pub stage: LoginStage,
}

/// Invoked after a session has been persisted.
#[async_trait]
pub trait PostLoginHook: Send + Sync {
    /// Called once per successful login of `uid` at `provider`.
    async fn on_login_succeeded(
        &self,
        uid: &str,
        provider: &Provider,
    ) -> Result<(), Report<HookError>>;
}

/// URLs the flow hands to the provider and the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginUrls {
    /// Absolute URL of the callback route.
    pub redirect_uri: String,
    /// Personal settings page the browser returns to.
    pub completion_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
    #[serde(default)]
    access_token: String,
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: String,
    refresh_expires_in: Option<i64>,
}

/// Generates a `state` or `nonce` value: 50 characters of `[0-9A-Z]`
/// (about 258 bits).
#[must_use]
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    (0..STATE_LENGTH)
        .map(|_| char::from(STATE_ALPHABET[rng.gen_range(0..STATE_ALPHABET.len())]))
        .collect()
}

fn failed(stage: LoginStage, error: LoginError) -> Report<LoginError> {
    warn!(%stage, error = %error, "login failed");
    error.into()
}

fn from_registry(e: Report<RegistryError>) -> LoginError {
    match e.current_context() {
        RegistryError::NotFound { provider_id } => LoginError::ProviderNotFound {
            provider_id: *provider_id,
        },
        RegistryError::MissingEndpoint { endpoint, .. } => LoginError::MissingEndpoint {
            endpoint: *endpoint,
        },
        RegistryError::DiscoveryFailed { .. } => LoginError::DiscoveryFailed {
            details: e.to_string(),
        },
        _ => LoginError::Storage {
            details: e.to_string(),
        },
    }
}

/// The authorization-code flow.
#[derive(Clone)]
pub struct LoginFlow {
    registry: ProviderRegistry,
    sessions: SessionManager,
    http: Arc<dyn HttpClient>,
    verification: VerificationConfig,
    urls: LoginUrls,
    hook: Option<Arc<dyn PostLoginHook>>,
}

impl LoginFlow {
    /// Creates a login flow without a post-login hook.
    pub fn new(
        registry: ProviderRegistry,
        sessions: SessionManager,
        http: Arc<dyn HttpClient>,
        verification: VerificationConfig,
        urls: LoginUrls,
    ) -> Self {
        Self {
            registry,
            sessions,
            http,
            verification,
            urls,
            hook: None,
        }
    }

    /// Sets the hook invoked after each successful login.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PostLoginHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Starts a login at `provider_id`.
    ///
    /// Fails with [`LoginError::InsecureTransport`] before generating any
    /// state when the request is not secure.
    #[instrument(skip_all, fields(provider_id = %provider_id))]
    pub async fn begin_login(
        &self,
        provider_id: ProviderId,
        context: RequestContext,
    ) -> Result<LoginRedirect, Report<LoginError>> {
        if !context.secure {
            return Err(failed(LoginStage::Initiated, LoginError::InsecureTransport));
        }

        let provider = self
            .registry
            .get(provider_id)
            .await
            .map_err(|e| failed(LoginStage::Initiated, from_registry(e)))?;
        let authorization_endpoint = self
            .registry
            .endpoint(&provider, EndpointKind::Authorization)
            .await
            .map_err(|e| failed(LoginStage::Initiated, from_registry(e)))?;

        let pending = PendingLogin {
            state: generate_state(),
            nonce: generate_state(),
            provider_id,
        };

        let authorization_url = build_authorization_url(
            &authorization_endpoint,
            &provider,
            &self.urls.redirect_uri,
            &pending,
        )
        .map_err(|e| failed(LoginStage::Initiated, e))?;

        debug!(stage = %LoginStage::Initiated, "redirecting to provider");
        Ok(LoginRedirect {
            authorization_url,
            pending,
        })
    }

    /// Completes a login for the local user `uid`.
    ///
    /// `pending` is the value stored by [`begin_login`](Self::begin_login);
    /// the caller must discard it afterwards whatever the outcome, so a
    /// callback can never be replayed.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn handle_callback(
        &self,
        uid: &str,
        pending: Option<PendingLogin>,
        params: CallbackParams,
    ) -> Result<LoginOutcome, Report<LoginError>> {
        let stage = LoginStage::CallbackReceived;

        if !params.error.is_empty() {
            return Err(failed(
                stage,
                LoginError::UpstreamError {
                    error: params.error,
                    description: params.error_description,
                },
            ));
        }

        let pending = match pending {
            Some(pending) if states_match(&pending.state, &params.state) => pending,
            _ => return Err(failed(stage, LoginError::StateMismatch)),
        };

        let provider = self
            .registry
            .get(pending.provider_id)
            .await
            .map_err(|e| failed(stage, from_registry(e)))?;
        let endpoints = self
            .registry
            .resolve_endpoints(&provider)
            .await
            .map_err(|e| failed(stage, from_registry(e)))?;
        let missing = |kind: EndpointKind| {
            failed(
                stage,
                LoginError::MissingEndpoint {
                    endpoint: kind.as_str(),
                },
            )
        };
        let token_endpoint = endpoints
            .get(EndpointKind::Token)
            .ok_or_else(|| missing(EndpointKind::Token))?;
        let jwks_endpoint = endpoints
            .get(EndpointKind::Jwks)
            .ok_or_else(|| missing(EndpointKind::Jwks))?;

        let tokens = self
            .exchange_code(token_endpoint, &provider, &params.code)
            .await
            .map_err(|e| failed(stage, e))?;
        let Some(id_token) = tokens.id_token.clone().filter(|t| !t.is_empty()) else {
            return Err(failed(
                stage,
                LoginError::TokenExchangeFailed {
                    details: "response has no id_token".to_string(),
                },
            ));
        };

        let stage = LoginStage::TokenExchanged;
        debug!(%stage, "code exchanged");

        let keys = self
            .fetch_key_set(jwks_endpoint)
            .await
            .map_err(|e| failed(stage, e))?;

        let now = Utc::now().timestamp();
        let claims = verify_id_token(&id_token, &keys, &self.verification, now)
            .map_err(|e| failed(stage, token_failure(&e)))?;

        if !claims.audience_contains(&provider.client_id) {
            return Err(failed(
                stage,
                LoginError::AudienceMismatch {
                    client_id: provider.client_id.clone(),
                },
            ));
        }

        if let Some(nonce) = claims.get("nonce") {
            if nonce.as_str() != Some(pending.nonce.as_str()) {
                return Err(failed(stage, LoginError::NonceMismatch));
            }
        }

        let uid_claim = &provider.claims.uid_claim;
        let Some(subject) = claims.identifier(uid_claim) else {
            return Err(failed(
                stage,
                LoginError::MissingSubject {
                    claim: uid_claim.clone(),
                },
            ));
        };

        let stage = LoginStage::IdTokenValidated;
        debug!(%stage, subject = %subject, "ID token validated");

        let display_name = claims
            .string(&provider.claims.display_name_claim)
            .map_or_else(|| subject.clone(), str::to_string);

        let session = self
            .sessions
            .create_or_update(session_upsert(
                uid, &provider, id_token, subject, display_name, &claims, &tokens, now,
            ))
            .await
            .map_err(|e| failed(stage, from_session(&e)))?;

        let mut stage = LoginStage::SessionPersisted;
        info!(provider_id = %provider.id, "session persisted");

        if let Some(hook) = &self.hook {
            match hook.on_login_succeeded(uid, &provider).await {
                Ok(()) => stage = LoginStage::GroupsSynced,
                Err(e) => warn!(error = %e, "post-login hook failed"),
            }
        }

        Ok(LoginOutcome {
            redirect_url: format!("{}{}", self.urls.completion_url, COMPLETION_SUFFIX),
            session,
            stage,
        })
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        provider: &Provider,
        code: &str,
    ) -> Result<TokenResponse, LoginError> {
        let form = vec![
            ("code".to_string(), code.to_string()),
            ("client_id".to_string(), provider.client_id.clone()),
            ("client_secret".to_string(), provider.client_secret.clone()),
            ("redirect_uri".to_string(), self.urls.redirect_uri.clone()),
            ("grant_type".to_string(), "authorization_code".to_string()),
        ];
        let exchange_failed = |details: String| LoginError::TokenExchangeFailed { details };

        let response = self
            .http
            .post_form(token_endpoint, &form, &[])
            .await
            .map_err(|e| exchange_failed(e.to_string()))?;
        if !response.is_success() {
            return Err(exchange_failed(format!(
                "token endpoint returned status {}",
                response.status
            )));
        }
        response.json().map_err(|e| exchange_failed(e.to_string()))
    }

    async fn fetch_key_set(&self, jwks_endpoint: &str) -> Result<KeySet, LoginError> {
        let unavailable = |details: String| LoginError::JwksUnavailable { details };

        let response = self
            .http
            .get(jwks_endpoint, &[])
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !response.is_success() {
            return Err(unavailable(format!(
                "key set endpoint returned status {}",
                response.status
            )));
        }
        KeySet::from_json(&response.body).map_err(|e| unavailable(e.to_string()))
    }
}

fn states_match(stored: &str, given: &str) -> bool {
    stored.len() == given.len() && bool::from(stored.as_bytes().ct_eq(given.as_bytes()))
}

fn token_failure(e: &Report<TokenError>) -> LoginError {
    match e.current_context() {
        TokenError::Expired { exp } => LoginError::TokenExpired { exp: *exp },
        other => LoginError::InvalidToken {
            details: other.to_string(),
        },
    }
}

fn from_session(e: &Report<SessionError>) -> LoginError {
    LoginError::Storage {
        details: e.to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn session_upsert(
    uid: &str,
    provider: &Provider,
    id_token: String,
    subject: String,
    display_name: String,
    claims: &ClaimSet,
    tokens: &TokenResponse,
    now: i64,
) -> SessionUpsert {
    SessionUpsert {
        uid: uid.to_string(),
        provider_id: provider.id,
        id_token,
        id_token_sub: subject,
        id_token_exp: claims.integer("exp").unwrap_or_default(),
        access_token: tokens.access_token.clone(),
        access_token_exp: tokens.expires_in.map_or(0, |secs| now + secs),
        refresh_token: tokens.refresh_token.clone(),
        refresh_token_exp: tokens.refresh_expires_in.map_or(0, |secs| now + secs),
        userinfo_display_name: Some(display_name),
        last_sync: None,
    }
}

/// Builds the claims request for a provider.
///
/// Display-name and groups claims and any extra claims are requested
/// (`null`) for both the ID token and userinfo. The uid claim is marked
/// essential unless it is `sub`, which every ID token carries.
#[must_use]
pub fn claims_request(provider: &Provider) -> Value {
    let mut wanted = Map::new();
    wanted.insert(provider.claims.display_name_claim.clone(), Value::Null);
    wanted.insert(provider.claims.groups_claim.clone(), Value::Null);
    for extra in provider.settings.extra_claims() {
        wanted.insert(extra.to_string(), Value::Null);
    }
    if provider.claims.uid_claim != "sub" {
        wanted.insert(
            provider.claims.uid_claim.clone(),
            json!({ "essential": true }),
        );
    }
    json!({
        "id_token": Value::Object(wanted.clone()),
        "userinfo": Value::Object(wanted),
    })
}

/// Builds the authorization URL.
///
/// Query parameters already present on the configured endpoint are kept
/// unless a generated parameter has the same name.
pub fn build_authorization_url(
    endpoint: &str,
    provider: &Provider,
    redirect_uri: &str,
    pending: &PendingLogin,
) -> Result<String, LoginError> {
    let mut url = Url::parse(endpoint).map_err(|_| LoginError::MissingEndpoint {
        endpoint: EndpointKind::Authorization.as_str(),
    })?;

    let generated = [
        ("client_id", provider.client_id.clone()),
        ("response_type", "code".to_string()),
        ("scope", provider.scope.clone()),
        ("redirect_uri", redirect_uri.to_string()),
        ("claims", claims_request(provider).to_string()),
        ("state", pending.state.clone()),
        ("nonce", pending.nonce.clone()),
    ];

    let existing: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !generated.iter().any(|(name, _)| *name == &**key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(existing.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .extend_pairs(generated.iter().map(|(k, v)| (*k, v.as_str())));

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryProviderStore, InMemorySessionStore};
    use crate::registry::{ClaimMapping, NewProvider, ProviderSettings};
    use crate::session::SessionPolicy;
    use crate::testing::{TEST_KID, jwks_document, sign, sign_with_secret};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vo_federation_core::{Classify, ErrorClass, MockHttpClient};

    const AUTH_URL: &str = "https://idp.example/auth?kc_idp_hint=edu&state=stale";
    const TOKEN_URL: &str = "https://idp.example/token";
    const JWKS_URL: &str = "https://idp.example/certs";
    const REDIRECT_URI: &str = "https://cloud.example/apps/vo_federation/code";
    const COMPLETION_URL: &str = "https://cloud.example/settings/user/connected-accounts";

    #[derive(Default)]
    struct CountingHook {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PostLoginHook for CountingHook {
        async fn on_login_succeeded(
            &self,
            _uid: &str,
            _provider: &Provider,
        ) -> Result<(), Report<HookError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HookError {
                    details: "directory offline".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    struct Fixture {
        flow: LoginFlow,
        http: Arc<MockHttpClient>,
        sessions: SessionManager,
        hook: Arc<CountingHook>,
        provider: Provider,
    }

    async fn fixture_with(claims: ClaimMapping, fail_hook: bool) -> Fixture {
        let http = Arc::new(MockHttpClient::new());
        let registry = ProviderRegistry::new(Arc::new(InMemoryProviderStore::new()), http.clone());
        let provider = registry
            .create(NewProvider {
                identifier: "aai".to_string(),
                client_id: "nc".to_string(),
                client_secret: "secret".to_string(),
                discovery_endpoint: None,
                scope: "openid profile".to_string(),
                claims,
                settings: ProviderSettings {
                    authorization_endpoint: Some(AUTH_URL.to_string()),
                    token_endpoint: Some(TOKEN_URL.to_string()),
                    jwks_endpoint: Some(JWKS_URL.to_string()),
                    userinfo_endpoint: None,
                    extra_claims: Some("eduperson_entitlement".to_string()),
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
        let hook = Arc::new(CountingHook {
            calls: AtomicUsize::new(0),
            fail: fail_hook,
        });
        let flow = LoginFlow::new(
            registry,
            sessions.clone(),
            http.clone(),
            VerificationConfig::default(),
            LoginUrls {
                redirect_uri: REDIRECT_URI.to_string(),
                completion_url: COMPLETION_URL.to_string(),
            },
        )
        .with_hook(hook.clone());
        Fixture {
            flow,
            http,
            sessions,
            hook,
            provider,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(ClaimMapping::default(), false).await
    }

    fn pending(f: &Fixture) -> PendingLogin {
        PendingLogin {
            state: "STATE".to_string(),
            nonce: "NONCE".to_string(),
            provider_id: f.provider.id,
        }
    }

    fn callback(state: &str) -> CallbackParams {
        CallbackParams {
            state: state.to_string(),
            code: "the-code".to_string(),
            ..CallbackParams::default()
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn serve_tokens(f: &Fixture, id_token: &str) {
        f.http.respond_json(
            "POST",
            TOKEN_URL,
            200,
            &json!({
                "id_token": id_token,
                "access_token": "access-1",
                "expires_in": 300,
                "refresh_token": "refresh-1",
                "refresh_expires_in": 1800,
            }),
        );
        f.http
            .respond_json("GET", JWKS_URL, 200, &jwks_document(Some(TEST_KID)));
    }

    fn id_token(extra: Value) -> String {
        let mut claims = json!({
            "sub": "alice@idp",
            "aud": "nc",
            "exp": now() + 300,
            "nonce": "NONCE",
            "name": "Alice Example",
        });
        if let (Some(target), Value::Object(extra)) = (claims.as_object_mut(), extra) {
            target.extend(extra);
        }
        sign(&claims, Some(TEST_KID))
    }

    async fn login_error(f: &Fixture, params: CallbackParams) -> LoginError {
        f.flow
            .handle_callback("alice", Some(pending(f)), params)
            .await
            .expect_err("login should fail")
            .current_context()
            .clone()
    }

    #[test]
    fn generated_state_is_uppercase_alphanumeric() {
        let state = generate_state();
        assert_eq!(state.len(), STATE_LENGTH);
        assert!(state.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
        assert_ne!(state, generate_state());
    }

    #[tokio::test]
    async fn begin_login_requires_secure_transport() {
        let f = fixture().await;
        let err = f
            .flow
            .begin_login(f.provider.id, RequestContext { secure: false })
            .await
            .expect_err("insecure");
        assert_eq!(err.current_context(), &LoginError::InsecureTransport);
    }

    #[tokio::test]
    async fn begin_login_unknown_provider() {
        let f = fixture().await;
        let err = f
            .flow
            .begin_login(ProviderId::new(42), RequestContext { secure: true })
            .await
            .expect_err("missing");
        assert_eq!(err.current_context().class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn authorization_url_merges_existing_query() {
        let f = fixture().await;
        let redirect = f
            .flow
            .begin_login(f.provider.id, RequestContext { secure: true })
            .await
            .expect("redirect");

        let url = Url::parse(&redirect.authorization_url).expect("url");
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params["kc_idp_hint"], "edu");
        assert_eq!(params["state"], redirect.pending.state);
        assert_eq!(params["nonce"], redirect.pending.nonce);
        assert_eq!(params["client_id"], "nc");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], REDIRECT_URI);
        assert_eq!(
            url.query_pairs().filter(|(k, _)| k == "state").count(),
            1
        );

        let claims: Value = serde_json::from_str(&params["claims"]).expect("claims json");
        assert_eq!(claims["id_token"]["groups"], Value::Null);
        assert!(claims["userinfo"].get("eduperson_entitlement").is_some());
        assert!(claims["id_token"].get("sub").is_none());
    }

    #[test]
    fn non_sub_uid_claim_is_essential() {
        let provider = Provider {
            id: ProviderId::new(1),
            identifier: "aai".to_string(),
            client_id: "nc".to_string(),
            client_secret: String::new(),
            discovery_endpoint: None,
            scope: "openid".to_string(),
            claims: ClaimMapping {
                uid_claim: "eduperson_unique_id".to_string(),
                ..ClaimMapping::default()
            },
            settings: ProviderSettings::default(),
        };
        let claims = claims_request(&provider);
        assert_eq!(
            claims["id_token"]["eduperson_unique_id"],
            json!({"essential": true})
        );
    }

    #[tokio::test]
    async fn successful_callback_persists_session_and_runs_hook() {
        let f = fixture().await;
        serve_tokens(&f, &id_token(json!({})));

        let outcome = f
            .flow
            .handle_callback("alice", Some(pending(&f)), callback("STATE"))
            .await
            .expect("login");

        assert_eq!(
            outcome.redirect_url,
            format!("{COMPLETION_URL}?aaiToken=success#vo_federation_prefs")
        );
        assert_eq!(outcome.stage, LoginStage::GroupsSynced);
        assert_eq!(f.hook.calls.load(Ordering::SeqCst), 1);

        let session = f
            .sessions
            .get("alice", f.provider.id)
            .await
            .expect("session");
        assert_eq!(session.id_token_sub, "alice@idp");
        assert_eq!(session.access_token, "access-1");
        assert_eq!(session.refresh_token, "refresh-1");
        assert_eq!(session.userinfo_display_name.as_deref(), Some("Alice Example"));

        let exchange = &f.http.calls()[0];
        assert_eq!(exchange.form_value("grant_type"), Some("authorization_code"));
        assert_eq!(exchange.form_value("code"), Some("the-code"));
        assert_eq!(exchange.form_value("redirect_uri"), Some(REDIRECT_URI));
    }

    #[tokio::test]
    async fn replayed_callback_is_idempotent_on_session() {
        let f = fixture().await;
        serve_tokens(&f, &id_token(json!({})));

        for _ in 0..2 {
            f.flow
                .handle_callback("alice", Some(pending(&f)), callback("STATE"))
                .await
                .expect("login");
        }
        assert_eq!(f.sessions.list_for_user("alice").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn hook_failure_does_not_fail_login() {
        let f = fixture_with(ClaimMapping::default(), true).await;
        serve_tokens(&f, &id_token(json!({})));

        let outcome = f
            .flow
            .handle_callback("alice", Some(pending(&f)), callback("STATE"))
            .await
            .expect("login");
        assert_eq!(outcome.stage, LoginStage::SessionPersisted);
    }

    #[tokio::test]
    async fn upstream_error_is_reported_verbatim() {
        let f = fixture().await;
        let err = login_error(
            &f,
            CallbackParams {
                error: "access_denied".to_string(),
                error_description: "denied by user".to_string(),
                ..callback("STATE")
            },
        )
        .await;
        assert_eq!(
            err,
            LoginError::UpstreamError {
                error: "access_denied".to_string(),
                description: "denied by user".to_string(),
            }
        );
        assert_eq!(f.http.call_count(), 0);
    }

    #[tokio::test]
    async fn state_mismatch_makes_no_http_calls() {
        let f = fixture().await;
        serve_tokens(&f, &id_token(json!({})));

        assert_eq!(login_error(&f, callback("OTHER")).await, LoginError::StateMismatch);
        assert_eq!(f.http.call_count(), 0);

        let err = f
            .flow
            .handle_callback("alice", None, callback("STATE"))
            .await
            .expect_err("no pending login");
        assert_eq!(err.current_context(), &LoginError::StateMismatch);
        assert_eq!(f.http.call_count(), 0);
        assert_eq!(f.hook.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_exchange_failures() {
        let f = fixture().await;
        f.http.fail("POST", TOKEN_URL);
        let err = login_error(&f, callback("STATE")).await;
        assert_eq!(err.class(), ErrorClass::UpstreamTransport);
        assert!(matches!(err, LoginError::TokenExchangeFailed { .. }));

        f.http
            .respond_json("POST", TOKEN_URL, 200, &json!({"access_token": "a"}));
        assert!(matches!(
            login_error(&f, callback("STATE")).await,
            LoginError::TokenExchangeFailed { .. }
        ));
        assert_eq!(f.http.calls_to(JWKS_URL), 0);
    }

    #[tokio::test]
    async fn jwks_unavailable() {
        let f = fixture().await;
        serve_tokens(&f, &id_token(json!({})));
        f.http.fail("GET", JWKS_URL);
        assert!(matches!(
            login_error(&f, callback("STATE")).await,
            LoginError::JwksUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn expired_token_checked_after_signature() {
        let f = fixture().await;
        serve_tokens(
            &f,
            &id_token(json!({"exp": now() - 5, "aud": "someone-else", "nonce": "X"})),
        );
        assert!(matches!(
            login_error(&f, callback("STATE")).await,
            LoginError::TokenExpired { .. }
        ));

        let forged = sign_with_secret(
            &json!({"sub": "a", "aud": "nc", "exp": now() - 5}),
            Some(TEST_KID),
            b"forged-secret-forged-secret-1234",
        );
        serve_tokens(&f, &forged);
        assert!(matches!(
            login_error(&f, callback("STATE")).await,
            LoginError::InvalidToken { .. }
        ));
    }

    #[tokio::test]
    async fn audience_checked_before_nonce() {
        let f = fixture().await;
        serve_tokens(&f, &id_token(json!({"aud": ["x", "y"], "nonce": "WRONG"})));
        assert_eq!(
            login_error(&f, callback("STATE")).await,
            LoginError::AudienceMismatch {
                client_id: "nc".to_string()
            }
        );

        serve_tokens(&f, &id_token(json!({"aud": ["x", "nc"], "nonce": "WRONG"})));
        assert_eq!(
            login_error(&f, callback("STATE")).await,
            LoginError::NonceMismatch
        );
    }

    #[tokio::test]
    async fn absent_nonce_is_accepted() {
        let f = fixture().await;
        let token = sign(
            &json!({"sub": "alice@idp", "aud": "nc", "exp": now() + 300}),
            Some(TEST_KID),
        );
        serve_tokens(&f, &token);
        let outcome = f
            .flow
            .handle_callback("alice", Some(pending(&f)), callback("STATE"))
            .await
            .expect("login");
        assert_eq!(
            outcome.session.userinfo_display_name.as_deref(),
            Some("alice@idp")
        );
    }

    #[tokio::test]
    async fn missing_mapped_subject_fails() {
        let f = fixture_with(
            ClaimMapping {
                uid_claim: "eduperson_unique_id".to_string(),
                ..ClaimMapping::default()
            },
            false,
        )
        .await;
        serve_tokens(&f, &id_token(json!({})));
        assert_eq!(
            login_error(&f, callback("STATE")).await,
            LoginError::MissingSubject {
                claim: "eduperson_unique_id".to_string()
            }
        );
        assert!(f.sessions.find("alice", f.provider.id).await.expect("find").is_none());
    }
}
