//! Virtual-organisation groups for vo-federation.
//!
//! Groups asserted by an identity provider are mirrored into the host's
//! group directory and tagged with the provider that owns them.
//! [`GroupReconciler`] keeps a user's memberships in line with the
//! provider's groups claim, and [`ProviderLifecycle`] applies provider
//! administration and logout to sessions and memberships.

pub mod directory;
pub mod display;
pub mod error;
pub mod lifecycle;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod reconcile;

pub use directory::{Group, GroupDirectory, GroupUpsert};
pub use display::DisplayNamePattern;
pub use error::{DirectoryError, LifecycleError, SyncError};
pub use lifecycle::{FEDERATION_CHANGE_TARGET, ProviderLifecycle};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryGroupDirectory;
pub use reconcile::{GroupReconciler, SyncReport};
