//! Read path: cached results now, a deduplicated refresh in the background.

use super::{Shared, SyncCoordinator, SyncEvent, SyncFailure};
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{merge_snapshot, EntityReconciler, MergeReport};
use crate::store::{Query, Subscription};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// Result of a read-through refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The snapshot was merged into the store.
    Refreshed(MergeReport),
    /// The refresh failed; cached data was left untouched.
    Failed(SyncFailure),
    /// The refresh was cancelled before it finished.
    Cancelled,
}

impl FetchOutcome {
    /// Returns true for [`FetchOutcome::Refreshed`].
    pub fn is_refreshed(&self) -> bool {
        matches!(self, FetchOutcome::Refreshed(_))
    }
}

/// What [`SyncCoordinator::read_through`] returns.
pub struct ReadThrough<T> {
    /// Cached result at call time.
    pub immediate: Vec<T>,
    /// Fresh results after every committed change touching the query,
    /// including the merge of the background refresh.
    pub updates: Subscription<T>,
    /// The background refresh.
    pub fetch: FetchHandle,
}

type OutcomeRx = watch::Receiver<Option<FetchOutcome>>;

struct InFlight {
    ticket: u64,
    interest: usize,
    outcome: OutcomeRx,
    abort: AbortHandle,
}

/// In-flight fetches keyed by query key.
#[derive(Default)]
pub(crate) struct FetchTable {
    entries: Mutex<HashMap<String, InFlight>>,
    next_ticket: AtomicU64,
    cancelled: AtomicU64,
}

impl FetchTable {
    pub(crate) fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn finish(&self, key: &str, ticket: u64) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.ticket == ticket) {
            entries.remove(key);
        }
    }

    fn release(&self, key: &str, ticket: u64, cancel: bool) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key).filter(|e| e.ticket == ticket) else {
            return;
        };
        entry.interest = entry.interest.saturating_sub(1);
        if cancel && entry.interest == 0 {
            entry.abort.abort();
            entries.remove(key);
            self.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(key, "fetch cancelled");
        }
    }
}

/// Handle on a background refresh, possibly shared with other callers of
/// the same query.
///
/// Dropping the handle detaches from the refresh without stopping it. Use
/// [`cancel`](FetchHandle::cancel) to stop it; the shared fetch is aborted
/// once no other handle is interested.
pub struct FetchHandle {
    key: String,
    ticket: u64,
    outcome: OutcomeRx,
    table: Weak<FetchTable>,
    joined: bool,
    released: bool,
}

impl FetchHandle {
    /// Query key of the refresh.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true if this handle joined a fetch already in flight.
    pub fn joined(&self) -> bool {
        self.joined
    }

    /// Waits for the refresh to finish.
    pub async fn outcome(&mut self) -> FetchOutcome {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(FetchOutcome::Cancelled),
            Err(_) => FetchOutcome::Cancelled,
        }
    }

    /// Withdraws interest in the refresh, aborting it if no other handle
    /// remains. Committed local state is unaffected.
    pub fn cancel(mut self) {
        self.release(true);
    }

    fn release(&mut self, cancel: bool) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            table.release(&self.key, self.ticket, cancel);
        }
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        self.release(false);
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("key", &self.key)
            .field("ticket", &self.ticket)
            .field("joined", &self.joined)
            .finish()
    }
}

impl<R: EntityReconciler> SyncCoordinator<R> {
    /// Returns the cached result of `query` and refreshes it in the
    /// background.
    ///
    /// Never waits on the network. The refresh merges into the store, so
    /// `updates` yields the fresher result without another request. While a
    /// refresh for the same query key is in flight, new callers join it
    /// instead of starting another.
    pub fn read_through(&self, query: Query<R::Entity>) -> SyncResult<ReadThrough<R::Entity>> {
        let updates = self.shared.store.subscribe(query.predicate());
        let immediate = self.shared.store.query(&|e: &R::Entity| query.matches(e))?;
        let fetch = self.refresh(query);
        Ok(ReadThrough {
            immediate,
            updates,
            fetch,
        })
    }

    /// Starts (or joins) a background refresh of `query`.
    pub fn refresh(&self, query: Query<R::Entity>) -> FetchHandle {
        let key = query.key();
        let table = &self.shared.fetches;
        let mut entries = table.entries.lock();

        if let Some(entry) = entries.get_mut(&key) {
            entry.interest += 1;
            self.shared.stats.write().fetches_joined += 1;
            debug!(key = %key, "joining in-flight fetch");
            return FetchHandle {
                key,
                ticket: entry.ticket,
                outcome: entry.outcome.clone(),
                table: Arc::downgrade(table),
                joined: true,
                released: false,
            };
        }

        let ticket = table.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        self.shared.stats.write().fetches_started += 1;

        let shared = Arc::clone(&self.shared);
        let task_key = key.clone();
        let join = tokio::spawn(async move {
            let outcome = shared.run_fetch(&query).await;
            tx.send_replace(Some(outcome));
            shared.fetches.finish(&task_key, ticket);
        });

        entries.insert(
            key.clone(),
            InFlight {
                ticket,
                interest: 1,
                outcome: rx.clone(),
                abort: join.abort_handle(),
            },
        );

        FetchHandle {
            key,
            ticket,
            outcome: rx,
            table: Arc::downgrade(table),
            joined: false,
            released: false,
        }
    }
}

impl<R: EntityReconciler> Shared<R> {
    async fn run_fetch(&self, query: &Query<R::Entity>) -> FetchOutcome {
        let key = query.key();
        debug!(key = %key, "fetching");

        let fetched = self
            .with_retry("fetch", || self.remote.fetch(query.remote()), |_, _| {})
            .await;
        let merged = fetched.and_then(|snapshot| {
            let report = merge_snapshot(&self.reconciler, &*self.store, query, &snapshot)?;
            Ok((report, snapshot.taken_at))
        });

        match merged {
            Ok((report, taken_at)) => {
                self.stats.write().fetches_completed += 1;
                self.touch_last_synced(taken_at);
                info!(
                    key = %key,
                    merged = report.merged,
                    pruned = report.pruned,
                    "refresh complete"
                );
                self.publish(SyncEvent::FetchCompleted { key, report });
                FetchOutcome::Refreshed(report)
            }
            Err(error) => self.fetch_failed(key, error),
        }
    }

    fn fetch_failed(&self, key: String, error: SyncError) -> FetchOutcome {
        {
            let mut stats = self.stats.write();
            stats.fetches_failed += 1;
            stats.last_error = Some(error.to_string());
        }
        let failure = SyncFailure::new(error, self.now());
        self.publish(SyncEvent::FetchFailed {
            key,
            failure: failure.clone(),
        });
        FetchOutcome::Failed(failure)
    }
}
