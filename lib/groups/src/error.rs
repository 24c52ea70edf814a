//! Group synchronisation error types.

use std::fmt;
use vo_federation_core::{Classify, ErrorClass, ProviderId};

/// Errors from a [`GroupDirectory`](crate::directory::GroupDirectory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The group does not exist.
    GroupNotFound { gid: String },
    /// The backing store failed.
    Backend { details: String },
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupNotFound { gid } => write!(f, "group '{}' not found", gid),
            Self::Backend { details } => write!(f, "group directory error: {}", details),
        }
    }
}

impl std::error::Error for DirectoryError {}

impl Classify for DirectoryError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::GroupNotFound { .. } => ErrorClass::NotFound,
            Self::Backend { .. } => ErrorClass::Internal,
        }
    }
}

/// Errors from synchronising a user's groups.
///
/// Failures before the userinfo response is read leave memberships and
/// the session's sync timestamp untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The provider does not exist.
    ProviderNotFound { provider_id: ProviderId },
    /// The user has no session at this provider.
    SessionNotFound { uid: String, provider_id: ProviderId },
    /// The access token could not be refreshed.
    RefreshFailed { details: String },
    /// The provider has no userinfo endpoint.
    MissingEndpoint { endpoint: &'static str },
    /// The userinfo endpoint failed or returned garbage.
    UserinfoUnavailable { details: String },
    /// Persisting the session failed.
    Session { details: String },
    /// The group directory failed.
    Directory { details: String },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderNotFound { provider_id } => {
                write!(f, "provider '{}' not found", provider_id)
            }
            Self::SessionNotFound { uid, provider_id } => write!(
                f,
                "user '{}' has no session at provider '{}'",
                uid, provider_id
            ),
            Self::RefreshFailed { details } => {
                write!(f, "access token refresh failed: {}", details)
            }
            Self::MissingEndpoint { endpoint } => {
                write!(f, "provider has no {} endpoint configured", endpoint)
            }
            Self::UserinfoUnavailable { details } => {
                write!(f, "userinfo unavailable: {}", details)
            }
            Self::Session { details } => write!(f, "session update failed: {}", details),
            Self::Directory { details } => write!(f, "group directory failed: {}", details),
        }
    }
}

impl std::error::Error for SyncError {}

impl Classify for SyncError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::ProviderNotFound { .. } | Self::SessionNotFound { .. } => ErrorClass::NotFound,
            Self::RefreshFailed { .. } | Self::UserinfoUnavailable { .. } => {
                ErrorClass::UpstreamTransport
            }
            Self::MissingEndpoint { .. } => ErrorClass::Validation,
            Self::Session { .. } | Self::Directory { .. } => ErrorClass::Internal,
        }
    }
}

/// Errors from provider create, update, delete and logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The provider does not exist.
    ProviderNotFound { provider_id: ProviderId },
    /// No session to log out of.
    SessionNotFound { uid: String, provider_id: ProviderId },
    /// Another provider already uses this identifier.
    DuplicateIdentifier { identifier: String },
    /// The provider configuration is unusable.
    InvalidProvider { details: String },
    /// A store failed.
    Storage { details: String },
    /// The group directory failed.
    Directory { details: String },
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderNotFound { provider_id } => {
                write!(f, "provider '{}' not found", provider_id)
            }
            Self::SessionNotFound { uid, provider_id } => write!(
                f,
                "user '{}' has no session at provider '{}'",
                uid, provider_id
            ),
            Self::DuplicateIdentifier { identifier } => {
                write!(f, "provider with identifier '{}' already exists", identifier)
            }
            Self::InvalidProvider { details } => write!(f, "invalid provider: {}", details),
            Self::Storage { details } => write!(f, "storage error: {}", details),
            Self::Directory { details } => write!(f, "group directory failed: {}", details),
        }
    }
}

impl std::error::Error for LifecycleError {}

impl Classify for LifecycleError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::ProviderNotFound { .. } | Self::SessionNotFound { .. } => ErrorClass::NotFound,
            Self::DuplicateIdentifier { .. } => ErrorClass::Conflict,
            Self::InvalidProvider { .. } => ErrorClass::Validation,
            Self::Storage { .. } | Self::Directory { .. } => ErrorClass::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_transport_failures_are_upstream() {
        let err = SyncError::UserinfoUnavailable {
            details: "timeout".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::UpstreamTransport);
        assert_eq!(err.to_string(), "userinfo unavailable: timeout");
    }

    #[test]
    fn lifecycle_classes() {
        assert_eq!(
            LifecycleError::DuplicateIdentifier {
                identifier: "aai".to_string()
            }
            .class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            LifecycleError::ProviderNotFound {
                provider_id: ProviderId::new(3)
            }
            .class(),
            ErrorClass::NotFound
        );
    }
}
