//! Change feed for observing committed store mutations.
//!
//! Every committed mutation of a [`MemoryStore`](super::MemoryStore) is
//! published as a batch of [`ChangeEvent`]s. A batch corresponds to one
//! commit: a single upsert, an atomic `upsert_all` or `transact`, a field update or a
//! removal. Subscribers never observe a partially applied batch.

use crate::entity::EntityId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Entity was inserted (no previous version existed).
    Insert,
    /// Entity was replaced or partially updated.
    Update,
    /// Entity was removed.
    Delete,
}

/// A single committed change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    /// Commit sequence number. Events of one batch share it.
    pub sequence: u64,
    /// Affected entity.
    pub entity_id: EntityId,
    /// Type of change.
    pub change_type: ChangeType,
    /// Value before the change. `None` for inserts.
    pub before: Option<T>,
    /// Value after the change. `None` for deletes.
    pub after: Option<T>,
}

impl<T> ChangeEvent<T> {
    /// Builds the event for replacing `before` with `after`.
    pub fn upsert(sequence: u64, entity_id: EntityId, before: Option<T>, after: T) -> Self {
        let change_type = if before.is_some() {
            ChangeType::Update
        } else {
            ChangeType::Insert
        };
        Self {
            sequence,
            entity_id,
            change_type,
            before,
            after: Some(after),
        }
    }

    /// Builds a delete event.
    pub fn delete(sequence: u64, entity_id: EntityId, before: T) -> Self {
        Self {
            sequence,
            entity_id,
            change_type: ChangeType::Delete,
            before: Some(before),
            after: None,
        }
    }

    /// Returns true if either side of the change satisfies `predicate`.
    pub fn touches(&self, predicate: &dyn Fn(&T) -> bool) -> bool {
        self.before.as_ref().is_some_and(predicate) || self.after.as_ref().is_some_and(predicate)
    }
}

/// Events of one commit.
pub type ChangeBatch<T> = Arc<Vec<ChangeEvent<T>>>;

/// Distributes committed batches to subscribers.
///
/// The change feed:
/// - Emits only committed changes
/// - Preserves commit order
/// - Supports any number of independent subscribers
/// - Never blocks the writer; slow subscribers observe a lag instead
pub struct ChangeFeed<T> {
    sender: broadcast::Sender<ChangeBatch<T>>,
    sequence: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> ChangeFeed<T> {
    /// Creates a feed buffering up to `capacity` batches per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Reserves the next commit sequence number.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the latest sequence number handed out.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Subscribes to all future batches.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch<T>> {
        self.sender.subscribe()
    }

    /// Publishes a batch. Empty batches are dropped.
    pub fn emit(&self, events: Vec<ChangeEvent<T>>) {
        if events.is_empty() {
            return;
        }
        // No receivers is not an error for a feed.
        let _ = self.sender.send(Arc::new(events));
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touches_either_side() {
        let id = EntityId::from_u128(1);
        let event = ChangeEvent::upsert(1, id, Some(3), 10);
        assert!(event.touches(&|v: &i32| *v < 5));
        assert!(event.touches(&|v: &i32| *v > 5));
        assert!(!event.touches(&|v: &i32| *v == 7));

        let insert = ChangeEvent::upsert(2, id, None, 1);
        assert_eq!(insert.change_type, ChangeType::Insert);

        let delete = ChangeEvent::delete(3, id, 4);
        assert_eq!(delete.change_type, ChangeType::Delete);
        assert!(delete.after.is_none());
    }

    #[tokio::test]
    async fn batches_delivered_in_order() {
        let feed: ChangeFeed<i32> = ChangeFeed::new(16);
        let mut rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        let id = EntityId::from_u128(1);
        let s1 = feed.next_sequence();
        feed.emit(vec![ChangeEvent::upsert(s1, id, None, 1)]);
        feed.emit(Vec::new());
        let s2 = feed.next_sequence();
        feed.emit(vec![ChangeEvent::upsert(s2, id, Some(1), 2)]);

        assert_eq!(rx.recv().await.unwrap()[0].sequence, 1);
        assert_eq!(rx.recv().await.unwrap()[0].sequence, 2);
        assert_eq!(feed.latest_sequence(), 2);
    }
}
