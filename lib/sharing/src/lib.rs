//! Federated group sharing for vo-federation.
//!
//! Cloud ids address virtual-organisation groups on partner instances.
//! Changes to a federated group share are recorded as queue rows and
//! delivered to partners by [`NotificationQueue`], which retries failed
//! deliveries a bounded number of times.

pub mod cloud_id;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod ocm;
pub mod queue;
pub mod share;
pub mod transport;

pub use cloud_id::{CloudId, normalize_remote_url, owner_user, resolve, split_user_remote};
pub use error::{CloudIdError, QueueError, TransportError};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryShareStore;
pub use ocm::OcmNotifier;
pub use queue::{DrainReport, NotificationQueue, QueueConfig};
pub use share::{FederatedShare, NewFederatedShare, NotificationAction, ShareStore};
pub use transport::{
    ExternalShare, HostShare, RemoteNotifier, ReshareGrant, ReshareRequest, ShareOffer,
    ShareSource,
};
