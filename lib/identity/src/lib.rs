//! OpenID Connect identity for vo-federation.
//!
//! This crate holds the provider registry, the per-user session store with
//! access-token refresh, ID token verification and the authorization-code
//! login flow. Group synchronisation hangs off the login flow through
//! [`PostLoginHook`].

pub mod claims;
pub mod error;
pub mod login;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod registry;
pub mod session;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

pub use claims::ClaimSet;
pub use error::{HookError, LoginError, RegistryError, SessionError, TokenError};
pub use login::{
    CallbackParams, LoginFlow, LoginOutcome, LoginRedirect, LoginStage, LoginUrls, PendingLogin,
    PostLoginHook, RequestContext,
};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{InMemoryProviderStore, InMemorySessionStore};
pub use registry::{
    ClaimMapping, EndpointKind, Endpoints, NewProvider, Provider, ProviderRegistry,
    ProviderSettings, ProviderStore, ProviderUpdate, ProviderUpdateOutcome, ProviderWithInstances,
    TrustedInstance,
};
pub use session::{Session, SessionManager, SessionPolicy, SessionStore, SessionUpsert};
pub use token::{KeySet, VerificationConfig, verify_id_token};
