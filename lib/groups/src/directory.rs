//! The group directory seam.
//!
//! Groups live in the host's directory. This crate only needs a small set
//! of operations on them, with the owning provider kept as an attribute of
//! the group itself.

use crate::error::DirectoryError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::Serialize;
use vo_federation_core::ProviderId;

/// A directory group, optionally owned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub gid: String,
    pub display_name: String,
    pub provider_id: Option<ProviderId>,
}

/// What [`GroupDirectory::upsert_group`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupUpsert {
    Created,
    Updated,
    Unchanged,
}

/// Operations on the host's group directory.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Returns a group.
    async fn group(&self, gid: &str) -> Result<Option<Group>, Report<DirectoryError>>;

    /// Creates the group, or updates its display name and owner when they
    /// differ. Safe to retry.
    async fn upsert_group(&self, group: &Group) -> Result<GroupUpsert, Report<DirectoryError>>;

    /// Every group in the directory, ordered by gid.
    async fn groups(&self) -> Result<Vec<Group>, Report<DirectoryError>>;

    /// The groups a user belongs to, ordered by gid.
    async fn user_groups(&self, uid: &str) -> Result<Vec<Group>, Report<DirectoryError>>;

    /// The members of a group.
    async fn group_members(&self, gid: &str) -> Result<Vec<String>, Report<DirectoryError>>;

    /// Adds a user to a group. Returns false if they already were a member.
    async fn add_user(&self, gid: &str, uid: &str) -> Result<bool, Report<DirectoryError>>;

    /// Removes a user from a group. Returns false if they were not a member.
    async fn remove_user(&self, gid: &str, uid: &str) -> Result<bool, Report<DirectoryError>>;

    /// Returns whether the group exists.
    async fn group_exists(&self, gid: &str) -> Result<bool, Report<DirectoryError>> {
        Ok(self.group(gid).await?.is_some())
    }

    /// Returns the provider owning a group.
    async fn provider_id(&self, gid: &str) -> Result<Option<ProviderId>, Report<DirectoryError>> {
        Ok(self.group(gid).await?.and_then(|group| group.provider_id))
    }
}
