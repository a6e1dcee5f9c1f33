//! Live query results.

use super::{ChangeBatch, Predicate};
use futures_util::stream::{self, Stream};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// Snapshot function evaluating a predicate against the current store.
pub(crate) type Snapshot<T> = Arc<dyn Fn(&Predicate<T>) -> Vec<T> + Send + Sync>;

/// A live view of a store query.
///
/// Each call to [`next`](Subscription::next) waits for the next committed
/// change touching the predicate and yields the whole result list as read at
/// that moment, so batches committed before the poll are already folded in.
/// The sequence ends only when the store is dropped.
pub struct Subscription<T> {
    receiver: broadcast::Receiver<ChangeBatch<T>>,
    predicate: Predicate<T>,
    snapshot: Snapshot<T>,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
    pub(crate) fn new(
        receiver: broadcast::Receiver<ChangeBatch<T>>,
        predicate: Predicate<T>,
        snapshot: Snapshot<T>,
    ) -> Self {
        Self {
            receiver,
            predicate,
            snapshot,
        }
    }

    /// Current result, without waiting.
    pub fn current(&self) -> Vec<T> {
        (self.snapshot)(&self.predicate)
    }

    /// Waits for the next relevant change and returns the fresh result.
    ///
    /// Returns `None` once the underlying store is gone.
    pub async fn next(&mut self) -> Option<Vec<T>> {
        loop {
            match self.receiver.recv().await {
                Ok(batch) => {
                    let predicate = &*self.predicate;
                    if batch.iter().any(|event| event.touches(predicate)) {
                        return Some(self.current());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscription lagged, re-reading store");
                    return Some(self.current());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Converts the subscription into a [`Stream`] of result lists.
    pub fn into_stream(self) -> impl Stream<Item = Vec<T>> + Send {
        stream::unfold(self, |mut sub| async move {
            let next = sub.next().await?;
            Some((next, sub))
        })
    }
}
