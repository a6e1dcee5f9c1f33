//! The sync coordinator.
//!
//! A coordinator owns the read path (cache first, refresh in the background)
//! and the write path (commit locally, submit in the background) for one
//! entity kind.

mod read;
mod registry;
mod task;
mod write;

pub use read::{FetchHandle, FetchOutcome, ReadThrough};
pub use registry::{KindSync, SyncRegistry};
pub use task::{SyncEvent, SyncFailure, SyncStats, SyncTask};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::entity::{Entity, SyncStatus};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::reconcile::EntityReconciler;
use crate::remote::RemoteClient;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use read::FetchTable;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use write::Lanes;

/// Drives synchronization of one entity kind.
///
/// Cloning is cheap; clones share state. Methods that start background work
/// must be called from within a Tokio runtime.
pub struct SyncCoordinator<R: EntityReconciler> {
    shared: Arc<Shared<R>>,
}

pub(crate) struct Shared<R: EntityReconciler> {
    config: SyncConfig,
    store: Arc<dyn LocalStore<R::Entity>>,
    remote: Arc<dyn RemoteClient>,
    clock: Arc<dyn Clock>,
    reconciler: R,
    fetches: Arc<FetchTable>,
    lanes: Mutex<Lanes<R::Entity>>,
    events: broadcast::Sender<SyncEvent>,
    stats: RwLock<SyncStats>,
    last_synced_at: RwLock<Option<DateTime<Utc>>>,
}

impl<R: EntityReconciler> SyncCoordinator<R> {
    /// Creates a coordinator.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore<R::Entity>>,
        remote: Arc<dyn RemoteClient>,
        clock: Arc<dyn Clock>,
        reconciler: R,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                remote,
                clock,
                reconciler,
                fetches: Arc::new(FetchTable::default()),
                lanes: Mutex::new(Lanes::default()),
                events,
                stats: RwLock::new(SyncStats::default()),
                last_synced_at: RwLock::new(None),
            }),
        }
    }

    /// Local store backing this coordinator.
    pub fn store(&self) -> &Arc<dyn LocalStore<R::Entity>> {
        &self.shared.store
    }

    /// Reconciler for this kind.
    pub fn reconciler(&self) -> &R {
        &self.shared.reconciler
    }

    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Subscribes to sync events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Current counters.
    pub fn stats(&self) -> SyncStats {
        let mut stats = self.shared.stats.read().clone();
        stats.fetches_cancelled = self.shared.fetches.cancelled();
        stats
    }

    /// Number of cached entities awaiting remote confirmation.
    pub fn pending_count(&self) -> SyncResult<usize> {
        self.count_status(SyncStatus::Pending)
    }

    /// Number of cached entities whose last submission failed.
    pub fn failed_count(&self) -> SyncResult<usize> {
        self.count_status(SyncStatus::Failed)
    }

    /// Time of the last successful fetch or submission for this kind.
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_synced_at.read()
    }

    fn count_status(&self, status: SyncStatus) -> SyncResult<usize> {
        Ok(self
            .shared
            .store
            .query(&|e: &R::Entity| e.sync_status() == status)?
            .len())
    }
}

impl<R: EntityReconciler> Clone for SyncCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: EntityReconciler> Shared<R> {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn publish(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn touch_last_synced(&self, at: DateTime<Utc>) {
        let mut last = self.last_synced_at.write();
        if last.map_or(true, |prev| prev < at) {
            *last = Some(at);
        }
    }

    fn record_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
    }

    /// Runs `call` under the per-call timeout and the retry policy.
    ///
    /// `on_retry` is told the number of attempts made and the delay before
    /// the next one. Transient failures outlasting the budget become
    /// [`SyncError::RetriesExhausted`]; anything else is returned as is.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &'static str,
        mut call: F,
        mut on_retry: impl FnMut(u32, Duration),
    ) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let policy = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.config.request_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::timeout()),
            };
            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if policy.should_retry(attempt, &error) {
                let delay = policy.next_delay(attempt);
                debug!(
                    what,
                    kind = %R::Entity::KIND,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );
                self.stats.write().retries += 1;
                attempt += 1;
                on_retry(attempt, delay);
                tokio::time::sleep(delay).await;
                continue;
            }

            let attempts = attempt + 1;
            warn!(what, kind = %R::Entity::KIND, attempts, error = %error, "remote call failed");
            return Err(if error.is_transient() {
                SyncError::RetriesExhausted {
                    attempts,
                    last: error,
                }
            } else {
                SyncError::Remote(error)
            });
        }
    }
}
