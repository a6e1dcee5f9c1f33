//! In-process store backed by an ordered map.

use super::subscription::Snapshot;
use super::{ChangeEvent, ChangeFeed, LocalStore, Predicate, StoreWrite, Subscription};
use crate::entity::{Entity, EntityId};
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

const DEFAULT_FEED_CAPACITY: usize = 1024;

struct Inner<T> {
    entities: RwLock<BTreeMap<EntityId, T>>,
    feed: ChangeFeed<T>,
}

/// A [`LocalStore`] kept entirely in memory.
///
/// All mutations take a single write lock and publish their change batch
/// before releasing it, so the change feed order always equals commit order.
pub struct MemoryStore<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Entity> MemoryStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Creates an empty store whose change feed buffers `capacity` batches
    /// per subscriber.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                entities: RwLock::new(BTreeMap::new()),
                feed: ChangeFeed::new(capacity),
            }),
        }
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.inner.entities.read().len()
    }

    /// True if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.inner.entities.read().is_empty()
    }

    /// Latest commit sequence number.
    pub fn latest_sequence(&self) -> u64 {
        self.inner.feed.latest_sequence()
    }
}

impl<T: Entity> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> LocalStore<T> for MemoryStore<T> {
    fn get(&self, id: EntityId) -> StoreResult<Option<T>> {
        Ok(self.inner.entities.read().get(&id).cloned())
    }

    fn query(&self, predicate: &dyn Fn(&T) -> bool) -> StoreResult<Vec<T>> {
        Ok(self
            .inner
            .entities
            .read()
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect())
    }

    fn upsert(&self, entity: T) -> StoreResult<()> {
        let mut entities = self.inner.entities.write();
        let id = entity.id();
        let before = entities.insert(id, entity.clone());
        let sequence = self.inner.feed.next_sequence();
        self.inner
            .feed
            .emit(vec![ChangeEvent::upsert(sequence, id, before, entity)]);
        Ok(())
    }

    fn upsert_all(&self, batch: Vec<T>) -> StoreResult<()> {
        let mut seen = HashSet::with_capacity(batch.len());
        for entity in &batch {
            if !seen.insert(entity.id()) {
                return Err(StoreError::Conflict(entity.id()));
            }
        }

        let mut entities = self.inner.entities.write();
        let sequence = self.inner.feed.next_sequence();
        let events = batch
            .into_iter()
            .map(|entity| {
                let id = entity.id();
                let before = entities.insert(id, entity.clone());
                ChangeEvent::upsert(sequence, id, before, entity)
            })
            .collect();
        self.inner.feed.emit(events);
        Ok(())
    }

    fn update_field(&self, id: EntityId, change: &mut dyn FnMut(&mut T)) -> StoreResult<T> {
        let mut entities = self.inner.entities.write();
        let slot = entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let before = slot.clone();
        change(slot);
        if slot.id() != id {
            *slot = before;
            return Err(StoreError::Conflict(id));
        }
        let after = slot.clone();
        let sequence = self.inner.feed.next_sequence();
        self.inner.feed.emit(vec![ChangeEvent::upsert(
            sequence,
            id,
            Some(before),
            after.clone(),
        )]);
        Ok(after)
    }

    fn remove(&self, id: EntityId) -> StoreResult<Option<T>> {
        let mut entities = self.inner.entities.write();
        let removed = entities.remove(&id);
        if let Some(before) = &removed {
            let sequence = self.inner.feed.next_sequence();
            self.inner
                .feed
                .emit(vec![ChangeEvent::delete(sequence, id, before.clone())]);
        }
        Ok(removed)
    }

    fn transact(&self, plan: &mut dyn FnMut(&[&T]) -> Vec<StoreWrite<T>>) -> StoreResult<usize> {
        let mut entities = self.inner.entities.write();
        let writes = {
            let current: Vec<&T> = entities.values().collect();
            plan(&current)
        };

        let mut seen = HashSet::with_capacity(writes.len());
        for write in &writes {
            if !seen.insert(write.id()) {
                return Err(StoreError::Conflict(write.id()));
            }
        }
        let writes: Vec<StoreWrite<T>> = writes
            .into_iter()
            .filter(|write| match write {
                StoreWrite::Upsert(_) => true,
                StoreWrite::Remove(id) => entities.contains_key(id),
            })
            .collect();
        if writes.is_empty() {
            return Ok(0);
        }

        let sequence = self.inner.feed.next_sequence();
        let events: Vec<ChangeEvent<T>> = writes
            .into_iter()
            .filter_map(|write| match write {
                StoreWrite::Upsert(entity) => {
                    let id = entity.id();
                    let before = entities.insert(id, entity.clone());
                    Some(ChangeEvent::upsert(sequence, id, before, entity))
                }
                StoreWrite::Remove(id) => entities
                    .remove(&id)
                    .map(|before| ChangeEvent::delete(sequence, id, before)),
            })
            .collect();
        let applied = events.len();
        self.inner.feed.emit(events);
        Ok(applied)
    }

    fn subscribe(&self, predicate: Predicate<T>) -> Subscription<T> {
        let receiver = self.inner.feed.subscribe();
        // Weak so a live subscription does not keep the feed open.
        let inner: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let snapshot: Snapshot<T> = Arc::new(move |predicate: &Predicate<T>| {
            let Some(inner) = inner.upgrade() else {
                return Vec::new();
            };
            let entities = inner.entities.read();
            entities.values().filter(|e| predicate(e)).cloned().collect()
        });
        Subscription::new(receiver, predicate, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Product, RemoteId, SyncMeta};
    use chrono::Utc;
    use std::time::Duration;

    fn product(n: u128, stock: i64) -> Product {
        let mut p = Product::new(format!("p{n}"), format!("bc{n}"), 100).with_stock(stock, 5);
        p.id = EntityId::from_u128(n);
        p
    }

    #[test]
    fn upsert_get_query() {
        let store = MemoryStore::new();
        store.upsert(product(1, 10)).unwrap();
        store.upsert(product(2, 2)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get(EntityId::from_u128(1)).unwrap().unwrap().quantity_current,
            10
        );
        let low = store.query(&|p: &Product| p.is_low_stock()).unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].id, EntityId::from_u128(2));
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = MemoryStore::new();
        store.upsert(product(1, 10)).unwrap();
        store.upsert(product(1, 10)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn upsert_all_rejects_duplicates_atomically() {
        let store = MemoryStore::new();
        let err = store
            .upsert_all(vec![product(1, 1), product(2, 2), product(1, 3)])
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict(EntityId::from_u128(1)));
        assert!(store.is_empty());

        store.upsert_all(vec![product(1, 1), product(2, 2)]).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn update_field_applies_in_place() {
        let store = MemoryStore::new();
        store.upsert(product(1, 10)).unwrap();

        let updated = store
            .update_field(EntityId::from_u128(1), &mut |p: &mut Product| {
                p.quantity_current -= 3
            })
            .unwrap();
        assert_eq!(updated.quantity_current, 7);
        assert_eq!(
            store.get(EntityId::from_u128(1)).unwrap().unwrap().quantity_current,
            7
        );

        let missing = store.update_field(EntityId::from_u128(9), &mut |_: &mut Product| {});
        assert_eq!(missing.unwrap_err(), StoreError::NotFound(EntityId::from_u128(9)));
    }

    #[test]
    fn update_field_cannot_change_id() {
        let store = MemoryStore::new();
        store.upsert(product(1, 10)).unwrap();
        let err = store
            .update_field(EntityId::from_u128(1), &mut |p: &mut Product| {
                p.id = EntityId::from_u128(2)
            })
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict(EntityId::from_u128(1)));
        assert!(store.get(EntityId::from_u128(1)).unwrap().is_some());
    }

    #[test]
    fn find_by_remote_id() {
        let store = MemoryStore::new();
        let mut p = product(1, 10);
        p.meta = SyncMeta::confirmed(RemoteId::from(77_i64), Utc::now());
        store.upsert(p).unwrap();
        store.upsert(product(2, 10)).unwrap();

        let found = store.find_by_remote_id(&RemoteId::from(77_i64)).unwrap().unwrap();
        assert_eq!(found.id, EntityId::from_u128(1));
        assert!(store.find_by_remote_id(&RemoteId::from(78_i64)).unwrap().is_none());
    }

    #[tokio::test]
    async fn subscription_emits_on_matching_changes() {
        let store = MemoryStore::new();
        store.upsert(product(1, 10)).unwrap();

        let mut low = store.subscribe(Arc::new(|p: &Product| p.is_low_stock()));
        assert!(low.current().is_empty());

        // Not touching the predicate on either side: no emission.
        store.upsert(product(2, 20)).unwrap();
        // Moves product 1 into the predicate.
        store
            .update_field(EntityId::from_u128(1), &mut |p: &mut Product| {
                p.quantity_current = 3
            })
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(1), low.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, EntityId::from_u128(1));

        // Leaving the predicate also emits.
        store.remove(EntityId::from_u128(1)).unwrap();
        let next = low.next().await.unwrap();
        assert!(next.is_empty());
    }

    #[test]
    fn transact_commits_plan_as_one_batch() {
        let store = MemoryStore::new();
        store.upsert(product(1, 10)).unwrap();
        store.upsert(product(2, 2)).unwrap();
        let mut feed = store.inner.feed.subscribe();

        let applied = store
            .transact(&mut |current: &[&Product]| {
                assert_eq!(current.len(), 2);
                current
                    .iter()
                    .map(|p| {
                        if p.is_low_stock() {
                            StoreWrite::Remove(p.id)
                        } else {
                            let mut p = (*p).clone();
                            p.quantity_current += 1;
                            StoreWrite::Upsert(p)
                        }
                    })
                    .chain([StoreWrite::Remove(EntityId::from_u128(9))])
                    .collect::<Vec<_>>()
            })
            .unwrap();

        assert_eq!(applied, 2);
        assert_eq!(
            store.get(EntityId::from_u128(1)).unwrap().unwrap().quantity_current,
            11
        );
        assert!(store.get(EntityId::from_u128(2)).unwrap().is_none());
        let batch = feed.try_recv().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn transact_rejects_duplicate_writes() {
        let store = MemoryStore::new();
        store.upsert(product(1, 10)).unwrap();

        let err = store
            .transact(&mut |_: &[&Product]| {
                vec![
                    StoreWrite::Upsert(product(1, 0)),
                    StoreWrite::Remove(EntityId::from_u128(1)),
                ]
            })
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict(EntityId::from_u128(1)));
        assert_eq!(
            store.get(EntityId::from_u128(1)).unwrap().unwrap().quantity_current,
            10
        );
        assert_eq!(store.transact(&mut |_: &[&Product]| Vec::new()).unwrap(), 0);
    }

    #[tokio::test]
    async fn subscriptions_are_independent() {
        let store: MemoryStore<Product> = MemoryStore::new();
        let mut a = store.subscribe(Arc::new(|_: &Product| true));
        store.upsert(product(1, 1)).unwrap();
        let mut b = store.subscribe(Arc::new(|_: &Product| true));
        store.upsert(product(2, 1)).unwrap();

        // One wake-up per batch, each reading the store as it is now.
        assert_eq!(a.next().await.unwrap().len(), 2);
        assert_eq!(a.next().await.unwrap().len(), 2);
        assert_eq!(b.next().await.unwrap().len(), 2);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), b.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn subscription_ends_with_store() {
        let store: MemoryStore<Product> = MemoryStore::new();
        let mut sub = store.subscribe(Arc::new(|_: &Product| true));
        drop(store);
        assert!(sub.next().await.is_none());
    }
}
