//! Submission worklist and its leases.
//!
//! The worklist is a shared ordered list of JSON-encoded [`QueueItem`]s. A
//! claim takes two leases: an item lock (value: the claiming worker) and a
//! user lock (value: the claimed application), so at most one application
//! per user is in flight across all workers.
//!
//! Claims are at-least-once. A lease that outlives its holder expires after
//! `lock_ttl`, and nothing fences a worker that keeps going past its lease.

use std::sync::Arc;

use db::{SharedStore, StoreError};
use submission_core::{ApplicationId, QueueItem, UserId};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::QueueConfig;

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Queue item encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Handle to the shared worklist. Cheap to clone.
#[derive(Clone)]
pub struct SubmissionQueue {
    store: Arc<dyn SharedStore>,
    config: QueueConfig,
}

impl std::fmt::Debug for SubmissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SubmissionQueue {
    pub fn new(store: Arc<dyn SharedStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.config.key_prefix)
    }

    fn application_lock_key(&self, application_id: ApplicationId) -> String {
        format!("{}:lock:application:{}", self.config.key_prefix, application_id)
    }

    fn user_lock_key(&self, user_id: UserId) -> String {
        format!("{}:lock:user:{}", self.config.key_prefix, user_id)
    }

    /// Append one item to the tail.
    pub async fn enqueue(&self, item: &QueueItem) -> Result<usize, QueueError> {
        self.enqueue_batch(std::slice::from_ref(item)).await
    }

    /// Append items to the tail in order. Duplicates are not detected.
    pub async fn enqueue_batch(&self, items: &[QueueItem]) -> Result<usize, QueueError> {
        let encoded = items
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let len = self.store.push_back(&self.queue_key(), encoded).await?;
        debug!(added = items.len(), queue_length = len, "Items enqueued");
        Ok(len)
    }

    /// Claim the first eligible item within the scan window.
    ///
    /// Items whose user already holds a lease, and items another worker
    /// claimed first, are skipped in place. `None` means nothing in the
    /// window was eligible.
    pub async fn dequeue(&self, worker_id: &str) -> Result<Option<QueueItem>, QueueError> {
        let queue_key = self.queue_key();
        let window = self
            .store
            .list_range(&queue_key, 0, Some(self.config.scan_window))
            .await?;

        for raw in window {
            let item: QueueItem = match serde_json::from_str(&raw) {
                Ok(item) => item,
                Err(err) => {
                    warn!(error = %err, "Skipping undecodable queue entry");
                    continue;
                }
            };

            let user_key = self.user_lock_key(item.user_id);
            if self.store.exists(&user_key).await? {
                trace!(application_id = %item.application_id, "User busy, skipping");
                continue;
            }

            let item_key = self.application_lock_key(item.application_id);
            if !self
                .store
                .set_if_absent(&item_key, worker_id, self.config.lock_ttl)
                .await?
            {
                trace!(application_id = %item.application_id, "Item claimed elsewhere, skipping");
                continue;
            }

            let application_id = item.application_id.to_string();
            let user_locked = match self
                .store
                .set_if_absent(&user_key, &application_id, self.config.lock_ttl)
                .await
            {
                Ok(locked) => locked,
                Err(err) => {
                    // The user lease may or may not be ours; only drop it if it is.
                    if let Ok(Some(holder)) = self.store.get(&user_key).await
                        && holder == application_id
                    {
                        self.abandon_claim(vec![item_key, user_key]).await;
                    } else {
                        self.abandon_claim(vec![item_key]).await;
                    }
                    return Err(err.into());
                }
            };
            if !user_locked {
                // Another worker claimed this user's slot since the check above.
                self.abandon_claim(vec![item_key]).await;
                continue;
            }

            match self.store.list_remove_one(&queue_key, &raw).await {
                Ok(true) => {}
                Ok(false) => {
                    // Withdrawn between the scan and the claim.
                    self.abandon_claim(vec![item_key, user_key]).await;
                    continue;
                }
                Err(err) => {
                    self.abandon_claim(vec![item_key, user_key]).await;
                    return Err(err.into());
                }
            }

            debug!(
                application_id = %item.application_id,
                user_id = %item.user_id,
                worker_id,
                "Item claimed"
            );
            return Ok(Some(item));
        }

        Ok(None)
    }

    /// Best-effort release of leases taken by a claim that did not complete.
    async fn abandon_claim(&self, keys: Vec<String>) {
        if let Err(err) = self.store.delete(&keys).await {
            warn!(error = %err, keys = ?keys, "Could not release partial claim");
        }
    }

    /// Drop both leases of a claim. Idempotent.
    pub async fn release_lock(
        &self,
        application_id: ApplicationId,
        user_id: UserId,
    ) -> Result<(), QueueError> {
        self.store
            .delete(&[
                self.application_lock_key(application_id),
                self.user_lock_key(user_id),
            ])
            .await?;
        Ok(())
    }

    /// Append the item to the tail with a new timestamp, then release the
    /// claim. If the append fails the leases are left for the caller.
    pub async fn requeue(&self, item: &QueueItem) -> Result<(), QueueError> {
        self.enqueue(&item.refreshed()).await?;
        self.release_lock(item.application_id, item.user_id).await
    }

    /// Withdraw a not-yet-claimed item. Scans the whole list.
    pub async fn remove_from_queue(&self, application_id: ApplicationId) -> Result<bool, QueueError> {
        let queue_key = self.queue_key();
        let entries = self.store.list_range(&queue_key, 0, None).await?;

        for raw in entries {
            let matches = serde_json::from_str::<QueueItem>(&raw)
                .is_ok_and(|item| item.application_id == application_id);
            if matches && self.store.list_remove_one(&queue_key, &raw).await? {
                debug!(application_id = %application_id, "Item withdrawn");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Entries waiting in the worklist, claimed ones excluded.
    pub async fn get_queue_length(&self) -> Result<usize, QueueError> {
        Ok(self.store.list_len(&self.queue_key()).await?)
    }

    /// Whether an application is currently leased by a worker.
    pub async fn is_processing(&self, application_id: ApplicationId) -> Result<bool, QueueError> {
        Ok(self
            .store
            .exists(&self.application_lock_key(application_id))
            .await?)
    }

    /// Whether a user has an application in flight.
    pub async fn is_user_processing(&self, user_id: UserId) -> Result<bool, QueueError> {
        Ok(self.store.exists(&self.user_lock_key(user_id)).await?)
    }

    /// The application holding a user's lease, if any.
    pub async fn user_lock_holder(
        &self,
        user_id: UserId,
    ) -> Result<Option<ApplicationId>, QueueError> {
        let holder = self.store.get(&self.user_lock_key(user_id)).await?;
        Ok(holder.and_then(|raw| ApplicationId::parse(&raw).ok()))
    }
}
