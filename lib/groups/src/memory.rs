//! In-memory group directory.

use crate::directory::{Group, GroupDirectory, GroupUpsert};
use crate::error::DirectoryError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct DirectoryTables {
    groups: BTreeMap<String, Group>,
    members: BTreeSet<(String, String)>,
}

/// A [`GroupDirectory`] held in memory.
#[derive(Clone, Default)]
pub struct InMemoryGroupDirectory {
    tables: Arc<Mutex<DirectoryTables>>,
}

impl InMemoryGroupDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every (gid, uid) membership, ordered.
    #[must_use]
    pub fn memberships(&self) -> Vec<(String, String)> {
        self.lock().members.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GroupDirectory for InMemoryGroupDirectory {
    async fn group(&self, gid: &str) -> Result<Option<Group>, Report<DirectoryError>> {
        Ok(self.lock().groups.get(gid).cloned())
    }

    async fn upsert_group(&self, group: &Group) -> Result<GroupUpsert, Report<DirectoryError>> {
        let mut tables = self.lock();
        if let Some(existing) = tables.groups.get_mut(&group.gid) {
            if *existing == *group {
                return Ok(GroupUpsert::Unchanged);
            }
            *existing = group.clone();
            return Ok(GroupUpsert::Updated);
        }
        tables.groups.insert(group.gid.clone(), group.clone());
        Ok(GroupUpsert::Created)
    }

    async fn groups(&self) -> Result<Vec<Group>, Report<DirectoryError>> {
        Ok(self.lock().groups.values().cloned().collect())
    }

    async fn user_groups(&self, uid: &str) -> Result<Vec<Group>, Report<DirectoryError>> {
        let tables = self.lock();
        Ok(tables
            .members
            .iter()
            .filter(|(_, member)| member == uid)
            .filter_map(|(gid, _)| tables.groups.get(gid).cloned())
            .collect())
    }

    async fn group_members(&self, gid: &str) -> Result<Vec<String>, Report<DirectoryError>> {
        Ok(self
            .lock()
            .members
            .iter()
            .filter(|(group, _)| group == gid)
            .map(|(_, uid)| uid.clone())
            .collect())
    }

    async fn add_user(&self, gid: &str, uid: &str) -> Result<bool, Report<DirectoryError>> {
        let mut tables = self.lock();
        if !tables.groups.contains_key(gid) {
            return Err(DirectoryError::GroupNotFound {
                gid: gid.to_string(),
            }
            .into());
        }
        Ok(tables.members.insert((gid.to_string(), uid.to_string())))
    }

    async fn remove_user(&self, gid: &str, uid: &str) -> Result<bool, Report<DirectoryError>> {
        Ok(self
            .lock()
            .members
            .remove(&(gid.to_string(), uid.to_string())))
    }
}
