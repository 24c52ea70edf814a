//! Seams to the host's share tables and to partner instances.

use crate::error::TransportError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use vo_federation_core::FederatedGroupShareId;

/// The host's view of a share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostShare {
    pub id: FederatedGroupShareId,
    /// Name of the shared node.
    pub node_name: String,
    pub owner: String,
    pub shared_by: String,
    pub shared_with: String,
    pub share_type: i32,
    pub permissions: i32,
}

/// The host's record of a share received from another instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalShare {
    pub token: String,
    pub remote_id: String,
    pub remote: String,
}

/// Read and write access to the host's share tables.
#[async_trait]
pub trait ShareSource: Send + Sync {
    /// Returns a share.
    async fn share(&self, id: FederatedGroupShareId) -> Result<HostShare, Report<TransportError>>;

    /// Returns whether `uid` is a local user.
    async fn user_exists(&self, uid: &str) -> Result<bool, Report<TransportError>>;

    /// Returns the incoming share a local reshare is based on. `owner` is
    /// the user part of the original owner's cloud id.
    async fn external_share(
        &self,
        share: &HostShare,
        owner: &str,
    ) -> Result<ExternalShare, Report<TransportError>>;

    /// Returns the id the partner assigned to a share.
    async fn remote_id(&self, id: FederatedGroupShareId) -> Result<String, Report<TransportError>>;

    /// Records the id the partner assigned to a share.
    async fn store_remote_id(
        &self,
        id: FederatedGroupShareId,
        remote_id: &str,
    ) -> Result<(), Report<TransportError>>;
}

/// A new share offered to a partner instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareOffer {
    pub token: String,
    pub share_with: String,
    pub name: String,
    pub provider_id: FederatedGroupShareId,
    pub owner: String,
    pub owner_cloud_id: String,
    pub shared_by: String,
    pub shared_by_cloud_id: String,
    pub share_type: i32,
}

/// A request for the original owner's instance to reshare to a recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshareRequest {
    /// Token of the incoming share being reshared.
    pub token: String,
    /// The owner instance's id of the incoming share.
    pub remote_id: String,
    /// The local share id.
    pub share_id: FederatedGroupShareId,
    /// The owner instance.
    pub remote: String,
    pub shared_by: String,
    pub share_with: String,
    pub permissions: i32,
    pub name: String,
}

/// The token and remote id issued for an accepted reshare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshareGrant {
    pub token: String,
    pub remote_id: String,
}

/// Delivers notifications to partner instances.
///
/// `Ok(false)` means the partner answered but did not accept the
/// notification; transport failures are errors.
#[async_trait]
pub trait RemoteNotifier: Send + Sync {
    /// Offers a share to a partner.
    async fn send_share(&self, offer: &ShareOffer) -> Result<bool, Report<TransportError>>;

    /// Tells `remote` that the share it knows as `id` was revoked.
    async fn send_unshare(
        &self,
        remote: &str,
        id: &str,
        token: &str,
    ) -> Result<bool, Report<TransportError>>;

    /// Asks the owner's instance to reshare. `None` means the owner
    /// accepted the request but issued no token; an error status is a
    /// [`TransportError::Rejected`].
    async fn request_reshare(
        &self,
        request: &ReshareRequest,
    ) -> Result<Option<ReshareGrant>, Report<TransportError>>;
}
