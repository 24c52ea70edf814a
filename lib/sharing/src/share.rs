//! Rows of the federated share notification queue.

use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vo_federation_core::{FederatedGroupShareId, InstanceId, ShareRowId, StoreError};

/// A notification waiting to be delivered to a partner instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Share,
    Unshare,
    UnshareReshare,
    Reshare,
}

impl NotificationAction {
    /// The value stored in the `notification` column.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Share => "share",
            Self::Unshare => "unshare",
            Self::UnshareReshare => "unshare_reshare",
            Self::Reshare => "reshare",
        }
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unknown `notification` column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseActionError(pub String);

impl fmt::Display for ParseActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown notification action '{}'", self.0)
    }
}

impl std::error::Error for ParseActionError {}

impl FromStr for NotificationAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "share" => Ok(Self::Share),
            "unshare" => Ok(Self::Unshare),
            "unshare_reshare" => Ok(Self::UnshareReshare),
            "reshare" => Ok(Self::Reshare),
            other => Err(ParseActionError(other.to_string())),
        }
    }
}

/// One recipient instance of a federated group share.
///
/// `notification` is cleared once the partner has been told; `tries`
/// counts failed deliveries of the pending notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedShare {
    pub id: ShareRowId,
    pub federated_group_share_id: FederatedGroupShareId,
    pub instance_id: InstanceId,
    pub cloud_id: Option<String>,
    pub accepted: i16,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub notification: Option<NotificationAction>,
    #[serde(rename = "try")]
    pub tries: i32,
}

/// Input for a new queue row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFederatedShare {
    pub federated_group_share_id: FederatedGroupShareId,
    pub instance_id: InstanceId,
    #[serde(default)]
    pub cloud_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub notification: Option<NotificationAction>,
}

/// Storage for queue rows.
#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Returns one row.
    async fn get(&self, id: ShareRowId) -> Result<Option<FederatedShare>, Report<StoreError>>;

    /// Returns every row of a federated group share.
    async fn find_all(
        &self,
        federated_group_share_id: FederatedGroupShareId,
    ) -> Result<Vec<FederatedShare>, Report<StoreError>>;

    /// Rows with a pending notification and fewer than `max_tries` failed
    /// attempts, least-tried first, at most `limit` of them.
    async fn pending(
        &self,
        max_tries: i32,
        limit: usize,
    ) -> Result<Vec<FederatedShare>, Report<StoreError>>;

    /// Rows with a pending notification and at least `max_tries` failed
    /// attempts.
    async fn dead_letters(&self, max_tries: i32)
    -> Result<Vec<FederatedShare>, Report<StoreError>>;

    /// Inserts a row with `accepted = 0` and `try = 0`.
    async fn insert(&self, share: &NewFederatedShare) -> Result<FederatedShare, Report<StoreError>>;

    /// Overwrites a row.
    async fn update(&self, share: &FederatedShare) -> Result<(), Report<StoreError>>;
}
