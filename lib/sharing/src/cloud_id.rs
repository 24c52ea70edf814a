//! Federated cloud ids of virtual-organisation groups.
//!
//! A group cloud id looks like `urn:geant:example.org:group:vo#aai@cloud.example`,
//! optionally with one marker character before `urn:`. The user part may
//! itself contain `@`, so ids are split on the last one.

use crate::error::CloudIdError;
use rootcause::prelude::Report;
use serde::Serialize;

/// A resolved cloud id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudId {
    /// The normalised id.
    pub id: String,
    /// Everything before the last `@`.
    pub user: String,
    /// Everything after the last `@`.
    pub remote: String,
}

impl CloudId {
    /// Builds the cloud id of a local user on the instance at `base_url`.
    ///
    /// The id carries the host without its scheme; `remote` keeps the
    /// normalised URL.
    #[must_use]
    pub fn local(user: &str, base_url: &str) -> Self {
        let remote = normalize_remote_url(base_url);
        let id = format!("{}@{}", user, strip_scheme(&remote));
        Self {
            id,
            user: user.to_string(),
            remote,
        }
    }
}

/// Returns whether `cloud_id` has the shape of a group cloud id.
#[must_use]
pub fn is_valid(cloud_id: &str) -> bool {
    cloud_id.contains('@') && cloud_id.find("urn:").is_some_and(|position| position <= 1)
}

/// Resolves a group cloud id into its user and remote parts.
pub fn resolve(cloud_id: &str) -> Result<CloudId, Report<CloudIdError>> {
    let invalid = || CloudIdError {
        cloud_id: cloud_id.to_string(),
    };
    if !is_valid(cloud_id) {
        return Err(invalid().into());
    }

    let id = normalize_remote_url(cloud_id);
    let (user, remote) = id.rsplit_once('@').ok_or_else(invalid)?;
    if user.is_empty() || remote.is_empty() {
        return Err(invalid().into());
    }

    Ok(CloudId {
        user: user.to_string(),
        remote: remote.to_string(),
        id: id.clone(),
    })
}

/// Normalises a remote URL for comparison and endpoint construction.
///
/// Backslashes become slashes, everything from `/index.php` on is dropped
/// (unless the string starts with it) and trailing slashes are removed.
#[must_use]
pub fn normalize_remote_url(url: &str) -> String {
    let mut remote = url.replace('\\', "/");
    if let Some(position) = remote.find("/index.php").filter(|&p| p > 0) {
        remote.truncate(position);
    }
    remote.trim_end_matches('/').to_string()
}

/// Splits any federated address into user and remote host.
///
/// Unlike [`resolve`] this accepts plain `user@host` addresses. The remote
/// is normalised and loses its scheme.
pub fn split_user_remote(address: &str) -> Result<(String, String), Report<CloudIdError>> {
    let invalid = || CloudIdError {
        cloud_id: address.to_string(),
    };
    let normalized = normalize_remote_url(address.trim());
    let (user, remote) = normalized.rsplit_once('@').ok_or_else(invalid)?;
    let remote = strip_scheme(remote);
    if user.is_empty() || remote.is_empty() {
        return Err(invalid().into());
    }
    Ok((user.to_string(), remote.to_string()))
}

/// The user part of a share owner.
///
/// Local owners are plain user ids and are returned unchanged. Federated
/// owners (`user@host`) lose their remote part.
#[must_use]
pub fn owner_user(owner: &str) -> String {
    let owner = owner.trim();
    if !owner.contains('@') {
        return owner.to_string();
    }
    split_user_remote(owner)
        .map(|(user, _)| user)
        .unwrap_or_else(|_| owner.to_string())
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}
