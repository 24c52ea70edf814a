//! The federated share notification queue.
//!
//! Every sweep selects rows with a pending notification that have failed
//! fewer than `max_tries` times, least-tried first, and tries to deliver
//! each one. A delivered notification is cleared. A failed one keeps its
//! action and has its try counter incremented. Each processed row is
//! written back whatever the outcome. Rows are never deleted here; rows
//! at the ceiling are reported by [`NotificationQueue::dead_letters`] until
//! an operator requeues them.

use crate::cloud_id::{CloudId, owner_user, split_user_remote};
use crate::error::{CloudIdError, QueueError, TransportError};
use crate::share::{FederatedShare, NewFederatedShare, NotificationAction, ShareStore};
use crate::transport::{RemoteNotifier, ReshareRequest, ShareOffer, ShareSource};
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use vo_federation_core::{ShareRowId, StoreError};

/// Default time between sweeps.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of failed attempts after which a row is no longer
/// selected.
pub const DEFAULT_MAX_TRIES: i32 = 5;

/// Default number of rows handled per sweep.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub interval: Duration,
    pub max_tries: i32,
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_tries: DEFAULT_MAX_TRIES,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Notifications delivered and cleared.
    pub delivered: usize,
    /// Rows whose delivery failed.
    pub failed: usize,
    /// Failed rows that reached the try ceiling.
    pub exhausted: usize,
}

fn storage(e: Report<StoreError>) -> QueueError {
    QueueError::Storage {
        details: e.to_string(),
    }
}

fn transport_failed(e: Report<TransportError>) -> QueueError {
    match e.current_context() {
        TransportError::Unreachable { remote, details } => QueueError::RemoteUnreachable {
            remote: remote.clone(),
            details: details.clone(),
        },
        TransportError::Rejected { remote, status } => QueueError::RemoteUnreachable {
            remote: remote.clone(),
            details: format!("status {}", status),
        },
        TransportError::ShareNotFound { share_id } => QueueError::ShareNotFound {
            share_id: *share_id,
        },
        TransportError::Source { details } => QueueError::Storage {
            details: details.clone(),
        },
    }
}

fn invalid_cloud_id(e: Report<CloudIdError>) -> QueueError {
    QueueError::InvalidCloudId {
        cloud_id: e.current_context().cloud_id.clone(),
    }
}

/// Delivers pending share notifications with bounded retries.
#[derive(Clone)]
pub struct NotificationQueue {
    store: Arc<dyn ShareStore>,
    source: Arc<dyn ShareSource>,
    notifier: Arc<dyn RemoteNotifier>,
    config: QueueConfig,
    local_url: String,
}

impl NotificationQueue {
    /// Creates a queue. `local_url` is this instance's public URL, used to
    /// build the cloud ids of local users.
    pub fn new(
        store: Arc<dyn ShareStore>,
        source: Arc<dyn ShareSource>,
        notifier: Arc<dyn RemoteNotifier>,
        config: QueueConfig,
        local_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            config,
            local_url: local_url.into(),
        }
    }

    /// The sweep settings.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Adds a row. The row starts with no failed attempts.
    pub async fn enqueue(
        &self,
        share: NewFederatedShare,
    ) -> Result<FederatedShare, Report<QueueError>> {
        let row = self.store.insert(&share).await.map_err(storage)?;
        debug!(row_id = %row.id, notification = ?row.notification, "share row enqueued");
        Ok(row)
    }

    /// Schedules `action` on an existing row and resets its try counter.
    pub async fn set_pending(
        &self,
        row_id: ShareRowId,
        action: NotificationAction,
    ) -> Result<FederatedShare, Report<QueueError>> {
        let mut row = self.row(row_id).await?;
        row.notification = Some(action);
        row.tries = 0;
        self.store.update(&row).await.map_err(storage)?;
        Ok(row)
    }

    /// Rows that stopped being retried.
    pub async fn dead_letters(&self) -> Result<Vec<FederatedShare>, Report<QueueError>> {
        Ok(self
            .store
            .dead_letters(self.config.max_tries)
            .await
            .map_err(storage)?)
    }

    /// Resets a row's try counter so the next sweep picks it up again.
    #[instrument(skip(self))]
    pub async fn requeue(&self, row_id: ShareRowId) -> Result<FederatedShare, Report<QueueError>> {
        let mut row = self.row(row_id).await?;
        row.tries = 0;
        self.store.update(&row).await.map_err(storage)?;
        info!(notification = ?row.notification, "share row requeued");
        Ok(row)
    }

    async fn row(&self, row_id: ShareRowId) -> Result<FederatedShare, Report<QueueError>> {
        self.store
            .get(row_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| QueueError::RowNotFound { row_id }.into())
    }

    /// Runs one sweep.
    ///
    /// Only failing to select rows is an error; per-row failures are
    /// counted and logged.
    pub async fn drain(&self) -> Result<DrainReport, Report<QueueError>> {
        let rows = self
            .store
            .pending(self.config.max_tries, self.config.batch_size)
            .await
            .map_err(storage)?;

        let mut report = DrainReport::default();
        for mut row in rows {
            match self.deliver(&mut row).await {
                Ok(()) => {
                    debug!(row_id = %row.id, "notification delivered");
                    row.notification = None;
                    report.delivered += 1;
                }
                Err(e) => {
                    row.tries += 1;
                    report.failed += 1;
                    if row.tries >= self.config.max_tries {
                        report.exhausted += 1;
                        warn!(
                            row_id = %row.id,
                            tries = row.tries,
                            error = %e,
                            "notification failed for the last time, row needs manual requeue"
                        );
                    } else {
                        warn!(row_id = %row.id, tries = row.tries, error = %e, "notification failed");
                    }
                }
            }

            if let Err(e) = self.store.update(&row).await {
                error!(row_id = %row.id, error = %e, "failed to persist share row");
            }
        }
        Ok(report)
    }

    #[instrument(skip(self, row), fields(row_id = %row.id, notification = ?row.notification))]
    async fn deliver(&self, row: &mut FederatedShare) -> Result<(), Report<QueueError>> {
        let Some(action) = row.notification else {
            return Ok(());
        };
        let cloud_id = row
            .cloud_id
            .clone()
            .ok_or(QueueError::MissingCloudId { row_id: row.id })?;
        let token = row.token.clone().unwrap_or_default();
        let share_id = row.federated_group_share_id;

        let sent = match action {
            NotificationAction::Share => {
                let share = self.source.share(share_id).await.map_err(transport_failed)?;
                let shared_by_local = self
                    .source
                    .user_exists(&share.shared_by)
                    .await
                    .map_err(transport_failed)?;
                let shared_by_cloud_id = if shared_by_local {
                    CloudId::local(&share.shared_by, &self.local_url).id
                } else {
                    share.shared_by.clone()
                };
                let offer = ShareOffer {
                    token,
                    share_with: cloud_id.clone(),
                    name: share.node_name,
                    provider_id: share_id,
                    owner_cloud_id: CloudId::local(&share.owner, &self.local_url).id,
                    owner: share.owner,
                    shared_by: share.shared_by,
                    shared_by_cloud_id,
                    share_type: share.share_type,
                };
                self.notifier
                    .send_share(&offer)
                    .await
                    .map_err(transport_failed)?
            }
            NotificationAction::Unshare => {
                let (_, remote) = split_user_remote(&cloud_id).map_err(invalid_cloud_id)?;
                self.notifier
                    .send_unshare(&remote, &share_id.to_string(), &token)
                    .await
                    .map_err(transport_failed)?
            }
            NotificationAction::UnshareReshare => {
                let (_, remote) = split_user_remote(&cloud_id).map_err(invalid_cloud_id)?;
                let remote_id = self
                    .source
                    .remote_id(share_id)
                    .await
                    .map_err(transport_failed)?;
                self.notifier
                    .send_unshare(&remote, &remote_id, &token)
                    .await
                    .map_err(transport_failed)?
            }
            NotificationAction::Reshare => {
                let share = self.source.share(share_id).await.map_err(transport_failed)?;
                let owner = owner_user(&share.owner);
                let external = self
                    .source
                    .external_share(&share, &owner)
                    .await
                    .map_err(transport_failed)?;
                let request = ReshareRequest {
                    token: external.token,
                    remote_id: external.remote_id,
                    share_id,
                    remote: external.remote,
                    shared_by: share.shared_by,
                    share_with: cloud_id.clone(),
                    permissions: share.permissions,
                    name: share.node_name,
                };
                let grant = self
                    .notifier
                    .request_reshare(&request)
                    .await
                    .map_err(|e| {
                        if matches!(e.current_context(), TransportError::Rejected { .. }) {
                            QueueError::RemoteRejected {
                                action,
                                cloud_id: cloud_id.clone(),
                            }
                        } else {
                            transport_failed(e)
                        }
                    })?;
                let Some(grant) = grant else {
                    return Err(QueueError::AlreadyShared { cloud_id }.into());
                };
                row.token = Some(grant.token);
                self.source
                    .store_remote_id(share_id, &grant.remote_id)
                    .await
                    .map_err(transport_failed)?;
                true
            }
        };

        if !sent {
            return Err(QueueError::RemoteRejected { action, cloud_id }.into());
        }
        Ok(())
    }

    /// Sweeps the queue every `interval` until the task is dropped.
    pub async fn run_periodically(&self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.drain().await {
                Ok(report) if report.delivered + report.failed > 0 => {
                    info!(
                        delivered = report.delivered,
                        failed = report.failed,
                        exhausted = report.exhausted,
                        "notification sweep"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "notification sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryShareStore;
    use crate::transport::{ExternalShare, HostShare, ReshareGrant};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vo_federation_core::{FederatedGroupShareId, InstanceId};

    const LOCAL_URL: &str = "https://cloud.example";

    struct FakeSource {
        stored_remote_ids: Mutex<Vec<(FederatedGroupShareId, String)>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                stored_remote_ids: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ShareSource for FakeSource {
        async fn share(
            &self,
            id: FederatedGroupShareId,
        ) -> Result<HostShare, Report<TransportError>> {
            if id.get() == 404 {
                return Err(TransportError::ShareNotFound { share_id: id }.into());
            }
            Ok(HostShare {
                id,
                node_name: "report.pdf".to_string(),
                owner: "alice".to_string(),
                shared_by: "alice".to_string(),
                shared_with: "urn:x:g".to_string(),
                share_type: 14,
                permissions: 19,
            })
        }

        async fn user_exists(&self, uid: &str) -> Result<bool, Report<TransportError>> {
            Ok(uid == "alice")
        }

        async fn external_share(
            &self,
            _share: &HostShare,
            owner: &str,
        ) -> Result<ExternalShare, Report<TransportError>> {
            Ok(ExternalShare {
                token: format!("incoming-{owner}"),
                remote_id: "55".to_string(),
                remote: "owner.example".to_string(),
            })
        }

        async fn remote_id(
            &self,
            _id: FederatedGroupShareId,
        ) -> Result<String, Report<TransportError>> {
            Ok("remote-77".to_string())
        }

        async fn store_remote_id(
            &self,
            id: FederatedGroupShareId,
            remote_id: &str,
        ) -> Result<(), Report<TransportError>> {
            self.stored_remote_ids
                .lock()
                .unwrap()
                .push((id, remote_id.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        unreachable: bool,
        accept: bool,
        reject_reshare: bool,
        grant: Option<ReshareGrant>,
        offers: Mutex<Vec<ShareOffer>>,
        unshares: Mutex<Vec<(String, String, String)>>,
        reshares: Mutex<Vec<ReshareRequest>>,
    }

    impl FakeNotifier {
        fn accepting() -> Self {
            Self {
                accept: true,
                ..Self::default()
            }
        }

        fn unreachable() -> Self {
            Self {
                unreachable: true,
                ..Self::default()
            }
        }

        fn check(&self, remote: &str) -> Result<(), Report<TransportError>> {
            if self.unreachable {
                return Err(TransportError::Unreachable {
                    remote: remote.to_string(),
                    details: "connection refused".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteNotifier for FakeNotifier {
        async fn send_share(&self, offer: &ShareOffer) -> Result<bool, Report<TransportError>> {
            self.check(&offer.share_with)?;
            self.offers.lock().unwrap().push(offer.clone());
            Ok(self.accept)
        }

        async fn send_unshare(
            &self,
            remote: &str,
            id: &str,
            token: &str,
        ) -> Result<bool, Report<TransportError>> {
            self.check(remote)?;
            self.unshares.lock().unwrap().push((
                remote.to_string(),
                id.to_string(),
                token.to_string(),
            ));
            Ok(self.accept)
        }

        async fn request_reshare(
            &self,
            request: &ReshareRequest,
        ) -> Result<Option<ReshareGrant>, Report<TransportError>> {
            self.check(&request.remote)?;
            if self.reject_reshare {
                return Err(TransportError::Rejected {
                    remote: request.remote.clone(),
                    status: 503,
                }
                .into());
            }
            self.reshares.lock().unwrap().push(request.clone());
            Ok(self.grant.clone())
        }
    }

    struct Fixture {
        queue: NotificationQueue,
        store: InMemoryShareStore,
        source: Arc<FakeSource>,
        notifier: Arc<FakeNotifier>,
    }

    fn fixture(notifier: FakeNotifier) -> Fixture {
        let store = InMemoryShareStore::new();
        let source = Arc::new(FakeSource::new());
        let notifier = Arc::new(notifier);
        let queue = NotificationQueue::new(
            Arc::new(store.clone()),
            source.clone(),
            notifier.clone(),
            QueueConfig {
                interval: Duration::from_millis(10),
                ..QueueConfig::default()
            },
            LOCAL_URL,
        );
        Fixture {
            queue,
            store,
            source,
            notifier,
        }
    }

    async fn enqueue(f: &Fixture, share_id: i64, action: NotificationAction) -> FederatedShare {
        f.queue
            .enqueue(NewFederatedShare {
                federated_group_share_id: FederatedGroupShareId::new(share_id),
                instance_id: InstanceId::new(1),
                cloud_id: Some("urn:x:g@partner.example".to_string()),
                token: Some("tok".to_string()),
                notification: Some(action),
            })
            .await
            .expect("enqueue")
    }

    async fn reload(f: &Fixture, row: &FederatedShare) -> FederatedShare {
        f.store.get(row.id).await.expect("get").expect("row")
    }

    async fn set_tries(f: &Fixture, row: &FederatedShare, tries: i32) {
        let mut row = reload(f, row).await;
        row.tries = tries;
        f.store.update(&row).await.expect("update");
    }

    #[tokio::test]
    async fn share_is_delivered_with_local_cloud_ids() {
        let f = fixture(FakeNotifier::accepting());
        let row = enqueue(&f, 7, NotificationAction::Share).await;

        let report = f.queue.drain().await.expect("drain");
        assert_eq!(report.delivered, 1);

        let row = reload(&f, &row).await;
        assert_eq!(row.notification, None);
        assert_eq!(row.tries, 0);

        let offers = f.notifier.offers.lock().unwrap();
        assert_eq!(offers[0].owner_cloud_id, "alice@cloud.example");
        assert_eq!(offers[0].shared_by_cloud_id, "alice@cloud.example");
        assert_eq!(offers[0].share_with, "urn:x:g@partner.example");
        assert_eq!(offers[0].token, "tok");
    }

    #[tokio::test]
    async fn failing_transport_increments_try_and_keeps_action() {
        let f = fixture(FakeNotifier::unreachable());
        let row = enqueue(&f, 7, NotificationAction::Share).await;

        let report = f.queue.drain().await.expect("drain");
        assert_eq!(report.failed, 1);

        let row = reload(&f, &row).await;
        assert_eq!(row.tries, 1);
        assert_eq!(row.notification, Some(NotificationAction::Share));
        assert_eq!(
            f.store
                .pending(DEFAULT_MAX_TRIES, DEFAULT_BATCH_SIZE)
                .await
                .expect("pending")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn rejection_counts_as_failure() {
        let f = fixture(FakeNotifier::default());
        let row = enqueue(&f, 7, NotificationAction::Unshare).await;

        f.queue.drain().await.expect("drain");
        let row = reload(&f, &row).await;
        assert_eq!(row.tries, 1);
        assert_eq!(row.notification, Some(NotificationAction::Unshare));
    }

    #[tokio::test]
    async fn selection_excludes_rows_at_ceiling() {
        let f = fixture(FakeNotifier::unreachable());
        let below = enqueue(&f, 1, NotificationAction::Share).await;
        let at = enqueue(&f, 2, NotificationAction::Share).await;
        set_tries(&f, &below, DEFAULT_MAX_TRIES - 1).await;
        set_tries(&f, &at, DEFAULT_MAX_TRIES).await;

        let report = f.queue.drain().await.expect("drain");
        assert_eq!(report.failed, 1);
        assert_eq!(report.exhausted, 1);
        assert_eq!(reload(&f, &at).await.tries, DEFAULT_MAX_TRIES);
        assert_eq!(reload(&f, &below).await.tries, DEFAULT_MAX_TRIES);

        let dead = f.queue.dead_letters().await.expect("dead letters");
        assert_eq!(dead.len(), 2);

        let again = f.queue.drain().await.expect("drain");
        assert_eq!(again, DrainReport::default());
    }

    #[tokio::test]
    async fn requeue_makes_row_eligible_again() {
        let f = fixture(FakeNotifier::accepting());
        let row = enqueue(&f, 7, NotificationAction::Unshare).await;
        set_tries(&f, &row, DEFAULT_MAX_TRIES).await;

        assert_eq!(f.queue.drain().await.expect("drain").delivered, 0);
        f.queue.requeue(row.id).await.expect("requeue");
        assert_eq!(f.queue.drain().await.expect("drain").delivered, 1);

        let err = f
            .queue
            .requeue(ShareRowId::new(999))
            .await
            .expect_err("missing");
        assert!(matches!(err.current_context(), QueueError::RowNotFound { .. }));
    }

    #[tokio::test]
    async fn unshare_targets_remote_of_cloud_id() {
        let f = fixture(FakeNotifier::accepting());
        enqueue(&f, 7, NotificationAction::Unshare).await;
        enqueue(&f, 8, NotificationAction::UnshareReshare).await;

        assert_eq!(f.queue.drain().await.expect("drain").delivered, 2);
        let unshares = f.notifier.unshares.lock().unwrap();
        assert!(unshares.contains(&(
            "partner.example".to_string(),
            "7".to_string(),
            "tok".to_string()
        )));
        assert!(unshares.contains(&(
            "partner.example".to_string(),
            "remote-77".to_string(),
            "tok".to_string()
        )));
    }

    #[tokio::test]
    async fn reshare_stores_grant() {
        let f = fixture(FakeNotifier {
            accept: true,
            grant: Some(ReshareGrant {
                token: "granted".to_string(),
                remote_id: "99".to_string(),
            }),
            ..FakeNotifier::default()
        });
        let row = enqueue(&f, 7, NotificationAction::Reshare).await;

        f.queue.drain().await.expect("drain");
        let row = reload(&f, &row).await;
        assert_eq!(row.token.as_deref(), Some("granted"));
        assert_eq!(row.notification, None);
        assert_eq!(row.tries, 0);

        let reshares = f.notifier.reshares.lock().unwrap();
        assert_eq!(reshares[0].token, "incoming-alice");
        assert_eq!(reshares[0].remote, "owner.example");
        assert_eq!(
            *f.source.stored_remote_ids.lock().unwrap(),
            vec![(FederatedGroupShareId::new(7), "99".to_string())]
        );
    }

    #[tokio::test]
    async fn reshare_without_grant_is_already_shared() {
        let f = fixture(FakeNotifier::accepting());
        let mut row = enqueue(&f, 7, NotificationAction::Reshare).await;

        let err = f.queue.deliver(&mut row).await.expect_err("conflict");
        assert_eq!(
            err.current_context(),
            &QueueError::AlreadyShared {
                cloud_id: "urn:x:g@partner.example".to_string()
            }
        );
        assert!(f.source.stored_remote_ids.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reshare_error_status_is_a_rejection() {
        let f = fixture(FakeNotifier {
            reject_reshare: true,
            ..FakeNotifier::default()
        });
        let mut row = enqueue(&f, 7, NotificationAction::Reshare).await;

        let err = f.queue.deliver(&mut row).await.expect_err("rejected");
        assert_eq!(
            err.current_context(),
            &QueueError::RemoteRejected {
                action: NotificationAction::Reshare,
                cloud_id: "urn:x:g@partner.example".to_string(),
            }
        );

        f.queue.drain().await.expect("drain");
        let row = reload(&f, &row).await;
        assert_eq!(row.tries, 1);
        assert_eq!(row.notification, Some(NotificationAction::Reshare));
    }

    #[tokio::test]
    async fn missing_host_share_fails_row() {
        let f = fixture(FakeNotifier::accepting());
        let row = enqueue(&f, 404, NotificationAction::Share).await;
        f.queue.drain().await.expect("drain");
        assert_eq!(reload(&f, &row).await.tries, 1);
    }

    #[tokio::test]
    async fn set_pending_resets_tries() {
        let f = fixture(FakeNotifier::accepting());
        let row = enqueue(&f, 7, NotificationAction::Share).await;
        set_tries(&f, &row, 3).await;

        let row = f
            .queue
            .set_pending(row.id, NotificationAction::Unshare)
            .await
            .expect("set pending");
        assert_eq!(row.tries, 0);
        assert_eq!(row.notification, Some(NotificationAction::Unshare));
    }

    #[tokio::test]
    async fn periodic_sweep_delivers() {
        let f = fixture(FakeNotifier::accepting());
        let row = enqueue(&f, 7, NotificationAction::Share).await;

        let queue = f.queue.clone();
        let task = tokio::spawn(async move { queue.run_periodically().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        assert_eq!(reload(&f, &row).await.notification, None);
    }
}
