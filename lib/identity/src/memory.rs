//! In-memory provider and session stores.
//!
//! Available under `cfg(test)` and the `test-utils` feature for the tests
//! of dependent crates.

use crate::registry::{Provider, ProviderStore, TrustedInstance};
use crate::session::{Session, SessionStore, SessionUpsert};
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use vo_federation_core::{ProviderId, SessionId, StoreError, TrustedInstanceId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ProviderTables {
    next_provider_id: i64,
    next_instance_id: i64,
    providers: Vec<Provider>,
    instances: Vec<TrustedInstance>,
}

/// A [`ProviderStore`] backed by vectors behind a mutex.
#[derive(Clone, Default)]
pub struct InMemoryProviderStore {
    tables: Arc<Mutex<ProviderTables>>,
}

impl InMemoryProviderStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderStore for InMemoryProviderStore {
    async fn list(&self) -> Result<Vec<Provider>, Report<StoreError>> {
        Ok(lock(&self.tables).providers.clone())
    }

    async fn get(&self, id: ProviderId) -> Result<Option<Provider>, Report<StoreError>> {
        Ok(lock(&self.tables)
            .providers
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Provider>, Report<StoreError>> {
        Ok(lock(&self.tables)
            .providers
            .iter()
            .find(|p| p.identifier == identifier)
            .cloned())
    }

    async fn insert(&self, provider: &Provider) -> Result<Provider, Report<StoreError>> {
        let mut tables = lock(&self.tables);
        if tables
            .providers
            .iter()
            .any(|p| p.identifier == provider.identifier)
        {
            return Err(StoreError::Duplicate {
                entity: "provider",
                key: provider.identifier.clone(),
            }
            .into());
        }
        tables.next_provider_id += 1;
        let stored = Provider {
            id: ProviderId::new(tables.next_provider_id),
            ..provider.clone()
        };
        tables.providers.push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, provider: &Provider) -> Result<(), Report<StoreError>> {
        let mut tables = lock(&self.tables);
        if tables
            .providers
            .iter()
            .any(|p| p.identifier == provider.identifier && p.id != provider.id)
        {
            return Err(StoreError::Duplicate {
                entity: "provider",
                key: provider.identifier.clone(),
            }
            .into());
        }
        if let Some(slot) = tables.providers.iter_mut().find(|p| p.id == provider.id) {
            *slot = provider.clone();
        }
        Ok(())
    }

    async fn delete(&self, id: ProviderId) -> Result<bool, Report<StoreError>> {
        let mut tables = lock(&self.tables);
        let before = tables.providers.len();
        tables.providers.retain(|p| p.id != id);
        Ok(tables.providers.len() != before)
    }

    async fn trusted_instances(
        &self,
        provider_id: ProviderId,
    ) -> Result<Vec<TrustedInstance>, Report<StoreError>> {
        Ok(lock(&self.tables)
            .instances
            .iter()
            .filter(|i| i.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn insert_trusted_instance(
        &self,
        provider_id: ProviderId,
        instance_url: &str,
    ) -> Result<TrustedInstance, Report<StoreError>> {
        let mut tables = lock(&self.tables);
        tables.next_instance_id += 1;
        let instance = TrustedInstance {
            id: TrustedInstanceId::new(tables.next_instance_id),
            provider_id,
            instance_url: instance_url.to_string(),
        };
        tables.instances.push(instance.clone());
        Ok(instance)
    }

    async fn delete_trusted_instance(
        &self,
        id: TrustedInstanceId,
    ) -> Result<(), Report<StoreError>> {
        lock(&self.tables).instances.retain(|i| i.id != id);
        Ok(())
    }

    async fn delete_trusted_instances(
        &self,
        provider_id: ProviderId,
    ) -> Result<u64, Report<StoreError>> {
        let mut tables = lock(&self.tables);
        let before = tables.instances.len();
        tables.instances.retain(|i| i.provider_id != provider_id);
        Ok((before - tables.instances.len()) as u64)
    }
}

#[derive(Default)]
struct SessionTable {
    next_id: i64,
    sessions: Vec<Session>,
}

/// A [`SessionStore`] backed by a vector behind a mutex.
///
/// Upserts hold the lock for the whole read-modify-write, so concurrent
/// upserts for one key never produce two rows.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    table: Arc<Mutex<SessionTable>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored session.
    #[must_use]
    pub fn all(&self) -> Vec<Session> {
        lock(&self.table).sessions.clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn upsert(&self, upsert: &SessionUpsert) -> Result<Session, Report<StoreError>> {
        let mut table = lock(&self.table);
        if let Some(existing) = table
            .sessions
            .iter_mut()
            .find(|s| s.uid == upsert.uid && s.provider_id == upsert.provider_id)
        {
            upsert.apply_to(existing);
            return Ok(existing.clone());
        }

        table.next_id += 1;
        let session = Session {
            id: SessionId::new(table.next_id),
            uid: upsert.uid.clone(),
            provider_id: upsert.provider_id,
            id_token: upsert.id_token.clone(),
            id_token_sub: upsert.id_token_sub.clone(),
            id_token_exp: upsert.id_token_exp,
            access_token: upsert.access_token.clone(),
            access_token_exp: upsert.access_token_exp,
            refresh_token: upsert.refresh_token.clone(),
            refresh_token_exp: upsert.refresh_token_exp,
            userinfo_display_name: upsert.userinfo_display_name.clone(),
            last_sync: upsert.last_sync,
        };
        table.sessions.push(session.clone());
        Ok(session)
    }

    async fn find(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Option<Session>, Report<StoreError>> {
        Ok(lock(&self.table)
            .sessions
            .iter()
            .find(|s| s.uid == uid && s.provider_id == provider_id)
            .cloned())
    }

    async fn list_for_user(&self, uid: &str) -> Result<Vec<Session>, Report<StoreError>> {
        let mut sessions: Vec<Session> = lock(&self.table)
            .sessions
            .iter()
            .filter(|s| s.uid == uid)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.provider_id);
        Ok(sessions)
    }

    async fn update(&self, session: &Session) -> Result<Session, Report<StoreError>> {
        let mut table = lock(&self.table);
        match table.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(slot) => {
                *slot = session.clone();
                Ok(session.clone())
            }
            None => Err(StoreError::Backend {
                details: format!("session {} does not exist", session.id),
            }
            .into()),
        }
    }

    async fn delete(
        &self,
        uid: &str,
        provider_id: ProviderId,
    ) -> Result<Option<Session>, Report<StoreError>> {
        let mut table = lock(&self.table);
        let position = table
            .sessions
            .iter()
            .position(|s| s.uid == uid && s.provider_id == provider_id);
        Ok(position.map(|index| table.sessions.remove(index)))
    }

    async fn delete_for_provider(
        &self,
        provider_id: ProviderId,
    ) -> Result<u64, Report<StoreError>> {
        let mut table = lock(&self.table);
        let before = table.sessions.len();
        table.sessions.retain(|s| s.provider_id != provider_id);
        Ok((before - table.sessions.len()) as u64)
    }
}
