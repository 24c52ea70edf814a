//! In-memory share store.

use crate::share::{FederatedShare, NewFederatedShare, ShareStore};
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use vo_federation_core::{FederatedGroupShareId, ShareRowId, StoreError};

#[derive(Default)]
struct ShareTable {
    next_id: i64,
    rows: Vec<FederatedShare>,
}

/// A [`ShareStore`] backed by a vector behind a mutex.
#[derive(Clone, Default)]
pub struct InMemoryShareStore {
    table: Arc<Mutex<ShareTable>>,
}

impl InMemoryShareStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row, ordered by id.
    #[must_use]
    pub fn rows(&self) -> Vec<FederatedShare> {
        self.lock().rows.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ShareTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ShareStore for InMemoryShareStore {
    async fn get(&self, id: ShareRowId) -> Result<Option<FederatedShare>, Report<StoreError>> {
        Ok(self.lock().rows.iter().find(|row| row.id == id).cloned())
    }

    async fn find_all(
        &self,
        federated_group_share_id: FederatedGroupShareId,
    ) -> Result<Vec<FederatedShare>, Report<StoreError>> {
        Ok(self
            .lock()
            .rows
            .iter()
            .filter(|row| row.federated_group_share_id == federated_group_share_id)
            .cloned()
            .collect())
    }

    async fn pending(
        &self,
        max_tries: i32,
        limit: usize,
    ) -> Result<Vec<FederatedShare>, Report<StoreError>> {
        let mut rows: Vec<FederatedShare> = self
            .lock()
            .rows
            .iter()
            .filter(|row| row.notification.is_some() && row.tries < max_tries)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.tries);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn dead_letters(
        &self,
        max_tries: i32,
    ) -> Result<Vec<FederatedShare>, Report<StoreError>> {
        Ok(self
            .lock()
            .rows
            .iter()
            .filter(|row| row.notification.is_some() && row.tries >= max_tries)
            .cloned()
            .collect())
    }

    async fn insert(&self, share: &NewFederatedShare) -> Result<FederatedShare, Report<StoreError>> {
        let mut table = self.lock();
        table.next_id += 1;
        let row = FederatedShare {
            id: ShareRowId::new(table.next_id),
            federated_group_share_id: share.federated_group_share_id,
            instance_id: share.instance_id,
            cloud_id: share.cloud_id.clone(),
            accepted: 0,
            token: share.token.clone(),
            notification: share.notification,
            tries: 0,
        };
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, share: &FederatedShare) -> Result<(), Report<StoreError>> {
        let mut table = self.lock();
        match table.rows.iter_mut().find(|row| row.id == share.id) {
            Some(row) => {
                *row = share.clone();
                Ok(())
            }
            None => Err(StoreError::Backend {
                details: format!("share row {} does not exist", share.id),
            }
            .into()),
        }
    }
}
