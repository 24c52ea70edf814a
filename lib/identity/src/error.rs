//! Identity error types.
//!
//! Errors are designed for layered context using rootcause: stores report
//! [`StoreError`](vo_federation_core::StoreError), the services here wrap
//! those into the domain errors below, and the server decides the response
//! from [`Classify::class`].

use std::fmt;
use vo_federation_core::{Classify, ErrorClass, ProviderId};

/// Errors from the provider registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No provider with this id.
    NotFound { provider_id: ProviderId },
    /// Another provider already uses this identifier.
    DuplicateIdentifier { identifier: String },
    /// The provider record is unusable.
    InvalidProvider { details: String },
    /// The provider has no usable endpoint of this kind.
    MissingEndpoint {
        provider_id: ProviderId,
        endpoint: &'static str,
    },
    /// Fetching the discovery document failed.
    DiscoveryFailed { url: String, details: String },
    /// The backing store failed.
    Storage { details: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { provider_id } => write!(f, "provider '{}' not found", provider_id),
            Self::DuplicateIdentifier { identifier } => {
                write!(f, "provider with identifier '{}' already exists", identifier)
            }
            Self::InvalidProvider { details } => write!(f, "invalid provider: {}", details),
            Self::MissingEndpoint {
                provider_id,
                endpoint,
            } => write!(
                f,
                "provider '{}' has no {} endpoint configured",
                provider_id, endpoint
            ),
            Self::DiscoveryFailed { url, details } => {
                write!(f, "discovery document '{}' unavailable: {}", url, details)
            }
            Self::Storage { details } => write!(f, "provider storage error: {}", details),
        }
    }
}

impl std::error::Error for RegistryError {}

impl Classify for RegistryError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::DuplicateIdentifier { .. } => ErrorClass::Conflict,
            Self::InvalidProvider { .. } | Self::MissingEndpoint { .. } => ErrorClass::Validation,
            Self::DiscoveryFailed { .. } => ErrorClass::UpstreamTransport,
            Self::Storage { .. } => ErrorClass::Internal,
        }
    }
}

/// Errors from the session store and token refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No session for this user and provider.
    NotFound { uid: String, provider_id: ProviderId },
    /// A key field was empty when creating a session.
    MissingRequiredField { field: &'static str },
    /// The session's provider no longer exists.
    ProviderNotFound { provider_id: ProviderId },
    /// The provider has no token endpoint to refresh against.
    MissingEndpoint { endpoint: &'static str },
    /// The token endpoint could not be reached.
    RefreshFailed { details: String },
    /// The token endpoint answered but did not issue a new access token.
    RefreshRejected { status: u16, details: String },
    /// The backing store failed.
    Storage { details: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { uid, provider_id } => write!(
                f,
                "no session for user '{}' at provider '{}'",
                uid, provider_id
            ),
            Self::MissingRequiredField { field } => {
                write!(f, "session must be created, missing required field '{}'", field)
            }
            Self::ProviderNotFound { provider_id } => {
                write!(f, "session provider '{}' not found", provider_id)
            }
            Self::MissingEndpoint { endpoint } => {
                write!(f, "provider has no {} endpoint configured", endpoint)
            }
            Self::RefreshFailed { details } => write!(f, "token refresh failed: {}", details),
            Self::RefreshRejected { status, details } => {
                write!(f, "token refresh rejected with status {}: {}", status, details)
            }
            Self::Storage { details } => write!(f, "session storage error: {}", details),
        }
    }
}

impl std::error::Error for SessionError {}

impl Classify for SessionError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } | Self::ProviderNotFound { .. } => ErrorClass::NotFound,
            Self::MissingRequiredField { .. } | Self::MissingEndpoint { .. } => {
                ErrorClass::Validation
            }
            Self::RefreshFailed { .. } => ErrorClass::UpstreamTransport,
            Self::RefreshRejected { .. } => ErrorClass::Protocol,
            Self::Storage { .. } => ErrorClass::Internal,
        }
    }
}

/// Errors from ID token verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The key set document could not be used.
    InvalidKeySet { details: String },
    /// The token header or payload could not be decoded.
    Malformed { details: String },
    /// The token is signed with an algorithm that is not allowed.
    UnsupportedAlgorithm { algorithm: String },
    /// No key in the set matches the token.
    NoMatchingKey { kid: Option<String> },
    /// The signature or a time-bound claim did not verify.
    InvalidSignature { details: String },
    /// The token's `exp` is at or before the current time.
    Expired { exp: i64 },
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeySet { details } => write!(f, "invalid key set: {}", details),
            Self::Malformed { details } => write!(f, "malformed token: {}", details),
            Self::UnsupportedAlgorithm { algorithm } => {
                write!(f, "token algorithm '{}' is not allowed", algorithm)
            }
            Self::NoMatchingKey { kid: Some(kid) } => {
                write!(f, "no key with id '{}' in key set", kid)
            }
            Self::NoMatchingKey { kid: None } => {
                write!(f, "token has no key id and key set has no default key")
            }
            Self::InvalidSignature { details } => {
                write!(f, "token verification failed: {}", details)
            }
            Self::Expired { exp } => write!(f, "token expired at {}", exp),
        }
    }
}

impl std::error::Error for TokenError {}

impl Classify for TokenError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Protocol
    }
}

/// Errors from the OIDC login flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// The inbound request was not made over a secure transport.
    InsecureTransport,
    /// The provider does not exist.
    ProviderNotFound { provider_id: ProviderId },
    /// The provider lacks an endpoint the flow needs.
    MissingEndpoint { endpoint: &'static str },
    /// The discovery document could not be fetched.
    DiscoveryFailed { details: String },
    /// The provider redirected back with an error.
    UpstreamError { error: String, description: String },
    /// The callback state does not match the pending login.
    StateMismatch,
    /// The authorization code could not be exchanged.
    TokenExchangeFailed { details: String },
    /// The provider's key set could not be fetched or decoded.
    JwksUnavailable { details: String },
    /// The ID token did not verify.
    InvalidToken { details: String },
    /// The ID token is expired.
    TokenExpired { exp: i64 },
    /// The ID token was not issued for this client.
    AudienceMismatch { client_id: String },
    /// The ID token nonce differs from the pending login's nonce.
    NonceMismatch,
    /// The mapped user id claim is absent or empty.
    MissingSubject { claim: String },
    /// Persisting the session failed.
    Storage { details: String },
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsecureTransport => write!(f, "login requires a secure transport"),
            Self::ProviderNotFound { provider_id } => {
                write!(f, "provider '{}' not found", provider_id)
            }
            Self::MissingEndpoint { endpoint } => {
                write!(f, "provider has no {} endpoint configured", endpoint)
            }
            Self::DiscoveryFailed { details } => {
                write!(f, "provider discovery failed: {}", details)
            }
            Self::UpstreamError { error, description } => {
                write!(f, "provider returned error '{}': {}", error, description)
            }
            Self::StateMismatch => write!(f, "state does not match"),
            Self::TokenExchangeFailed { details } => {
                write!(f, "token exchange failed: {}", details)
            }
            Self::JwksUnavailable { details } => write!(f, "key set unavailable: {}", details),
            Self::InvalidToken { details } => write!(f, "invalid ID token: {}", details),
            Self::TokenExpired { exp } => write!(f, "ID token expired at {}", exp),
            Self::AudienceMismatch { client_id } => {
                write!(f, "ID token audience does not contain '{}'", client_id)
            }
            Self::NonceMismatch => write!(f, "nonce does not match"),
            Self::MissingSubject { claim } => {
                write!(f, "ID token has no value for claim '{}'", claim)
            }
            Self::Storage { details } => write!(f, "failed to persist session: {}", details),
        }
    }
}

impl std::error::Error for LoginError {}

impl Classify for LoginError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::InsecureTransport
            | Self::UpstreamError { .. }
            | Self::StateMismatch
            | Self::InvalidToken { .. }
            | Self::TokenExpired { .. }
            | Self::AudienceMismatch { .. }
            | Self::NonceMismatch => ErrorClass::Protocol,
            Self::DiscoveryFailed { .. }
            | Self::TokenExchangeFailed { .. }
            | Self::JwksUnavailable { .. } => ErrorClass::UpstreamTransport,
            Self::ProviderNotFound { .. } => ErrorClass::NotFound,
            Self::MissingEndpoint { .. } | Self::MissingSubject { .. } => ErrorClass::Validation,
            Self::Storage { .. } => ErrorClass::Internal,
        }
    }
}

/// Error reported by a post-login hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookError {
    /// Error details.
    pub details: String,
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "post-login hook failed: {}", self.details)
    }
}

impl std::error::Error for HookError {}

impl Classify for HookError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_errors_classify_per_taxonomy() {
        assert_eq!(LoginError::StateMismatch.class(), ErrorClass::Protocol);
        assert_eq!(
            LoginError::TokenExchangeFailed {
                details: "timeout".to_string()
            }
            .class(),
            ErrorClass::UpstreamTransport
        );
        assert_eq!(
            LoginError::ProviderNotFound {
                provider_id: ProviderId::new(3)
            }
            .class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            LoginError::MissingSubject {
                claim: "sub".to_string()
            }
            .class(),
            ErrorClass::Validation
        );
    }

    #[test]
    fn upstream_error_is_surfaced_verbatim() {
        let err = LoginError::UpstreamError {
            error: "access_denied".to_string(),
            description: "User cancelled".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("access_denied"));
        assert!(msg.contains("User cancelled"));
    }

    #[test]
    fn registry_duplicate_is_conflict() {
        let err = RegistryError::DuplicateIdentifier {
            identifier: "aai".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Conflict);
    }
}
