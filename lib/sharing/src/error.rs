//! Sharing error types.

use crate::share::NotificationAction;
use std::fmt;
use vo_federation_core::{Classify, ErrorClass, FederatedGroupShareId, ShareRowId};

/// A cloud id that cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudIdError {
    pub cloud_id: String,
}

impl fmt::Display for CloudIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cloud id '{}'", self.cloud_id)
    }
}

impl std::error::Error for CloudIdError {}

impl Classify for CloudIdError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

/// Errors from the host share source and the remote notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote instance could not be reached.
    Unreachable { remote: String, details: String },
    /// The remote instance answered with an error status.
    Rejected { remote: String, status: u16 },
    /// The host has no share with this id.
    ShareNotFound { share_id: FederatedGroupShareId },
    /// The host's share tables failed.
    Source { details: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { remote, details } => {
                write!(f, "remote '{}' unreachable: {}", remote, details)
            }
            Self::Rejected { remote, status } => {
                write!(f, "remote '{}' answered with status {}", remote, status)
            }
            Self::ShareNotFound { share_id } => write!(f, "share '{}' not found", share_id),
            Self::Source { details } => write!(f, "share source error: {}", details),
        }
    }
}

impl std::error::Error for TransportError {}

impl Classify for TransportError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Unreachable { .. } => ErrorClass::UpstreamTransport,
            Self::Rejected { .. } => ErrorClass::Protocol,
            Self::ShareNotFound { .. } => ErrorClass::NotFound,
            Self::Source { .. } => ErrorClass::Internal,
        }
    }
}

/// Errors from the notification queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The partner instance could not be reached.
    RemoteUnreachable { remote: String, details: String },
    /// The partner answered but did not accept the notification.
    RemoteRejected {
        action: NotificationAction,
        cloud_id: String,
    },
    /// The partner already holds a share for this recipient.
    AlreadyShared { cloud_id: String },
    /// The row's cloud id cannot be resolved.
    InvalidCloudId { cloud_id: String },
    /// The row has no cloud id.
    MissingCloudId { row_id: ShareRowId },
    /// The host share behind the row is gone.
    ShareNotFound { share_id: FederatedGroupShareId },
    /// No queue row with this id.
    RowNotFound { row_id: ShareRowId },
    /// The share store or share source failed.
    Storage { details: String },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteUnreachable { remote, details } => write!(
                f,
                "could not reach '{}', the server may be unreachable or use a self-signed certificate: {}",
                remote, details
            ),
            Self::RemoteRejected { action, cloud_id } => write!(
                f,
                "remote rejected '{}' notification for '{}'",
                action, cloud_id
            ),
            Self::AlreadyShared { cloud_id } => {
                write!(f, "file is already shared with '{}'", cloud_id)
            }
            Self::InvalidCloudId { cloud_id } => write!(f, "invalid cloud id '{}'", cloud_id),
            Self::MissingCloudId { row_id } => {
                write!(f, "share row '{}' has no cloud id", row_id)
            }
            Self::ShareNotFound { share_id } => write!(f, "share '{}' not found", share_id),
            Self::RowNotFound { row_id } => write!(f, "share row '{}' not found", row_id),
            Self::Storage { details } => write!(f, "share storage error: {}", details),
        }
    }
}

impl std::error::Error for QueueError {}

impl Classify for QueueError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::RemoteUnreachable { .. } => ErrorClass::UpstreamTransport,
            Self::RemoteRejected { .. } => ErrorClass::Protocol,
            Self::AlreadyShared { .. } => ErrorClass::Conflict,
            Self::InvalidCloudId { .. } | Self::MissingCloudId { .. } => ErrorClass::Validation,
            Self::ShareNotFound { .. } | Self::RowNotFound { .. } => ErrorClass::NotFound,
            Self::Storage { .. } => ErrorClass::Internal,
        }
    }
}
