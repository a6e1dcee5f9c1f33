//! Local cache contract and the in-memory implementation.

mod change_feed;
mod memory;
mod subscription;

pub use change_feed::{ChangeBatch, ChangeEvent, ChangeFeed, ChangeType};
pub use memory::MemoryStore;
pub use subscription::Subscription;

use crate::entity::{Entity, EntityId, RemoteId};
use crate::error::StoreResult;
use crate::remote::FetchQuery;
use std::fmt;
use std::sync::Arc;

/// Shared entity predicate.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Local cache of one entity kind, keyed by local id.
///
/// Implementations must serialize mutations internally: concurrent
/// background syncs and foreground writes never observe or produce a
/// partially applied update. Every operation is non-suspending.
pub trait LocalStore<T: Entity>: Send + Sync + 'static {
    /// Gets an entity by local id.
    fn get(&self, id: EntityId) -> StoreResult<Option<T>>;

    /// Returns every entity satisfying `predicate`.
    fn query(&self, predicate: &dyn Fn(&T) -> bool) -> StoreResult<Vec<T>>;

    /// Inserts or replaces an entity by id.
    fn upsert(&self, entity: T) -> StoreResult<()>;

    /// Inserts or replaces a batch atomically: either every entity is
    /// committed or none is.
    fn upsert_all(&self, entities: Vec<T>) -> StoreResult<()>;

    /// Applies `change` to the stored entity under the store's write lock
    /// and returns the updated value.
    ///
    /// Use for narrow updates of independent fields (stock counters) to
    /// avoid read-modify-write races with concurrent upserts.
    fn update_field(&self, id: EntityId, change: &mut dyn FnMut(&mut T)) -> StoreResult<T>;

    /// Removes an entity, returning it if present.
    fn remove(&self, id: EntityId) -> StoreResult<Option<T>>;

    /// Runs `plan` against the current contents and commits the writes it
    /// returns as one atomic batch, all under the write lock.
    ///
    /// No other mutation lands between what `plan` reads and what it
    /// writes. Removes of absent ids are skipped. Returns the number of
    /// writes applied; two writes for the same id fail with
    /// [`StoreError::Conflict`](crate::StoreError::Conflict) and leave the
    /// store untouched.
    fn transact(&self, plan: &mut dyn FnMut(&[&T]) -> Vec<StoreWrite<T>>) -> StoreResult<usize>;

    /// Subscribes to the result of `predicate`.
    ///
    /// Every emission is the result as it stands when the subscriber polls,
    /// not as of the commit that woke it. Commits landing before a poll are
    /// therefore coalesced into the same view, and a subscriber may see the
    /// same list twice. Each subscriber still wakes once per relevant
    /// committed batch, until it is dropped.
    fn subscribe(&self, predicate: Predicate<T>) -> Subscription<T>;

    /// Finds the entity the remote knows as `remote_id`.
    fn find_by_remote_id(&self, remote_id: &RemoteId) -> StoreResult<Option<T>> {
        Ok(self
            .query(&|e: &T| e.meta().confirmed_remote_id() == Some(remote_id))?
            .into_iter()
            .next())
    }
}

/// One write decided inside [`LocalStore::transact`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite<T> {
    /// Insert or replace by id.
    Upsert(T),
    /// Remove by id.
    Remove(EntityId),
}

impl<T: Entity> StoreWrite<T> {
    /// Local id written.
    pub fn id(&self) -> EntityId {
        match self {
            StoreWrite::Upsert(entity) => entity.id(),
            StoreWrite::Remove(id) => *id,
        }
    }
}

/// A read-through query: the remote query to refresh from plus the local
/// predicate selecting its cached result.
pub struct Query<T> {
    remote: FetchQuery,
    predicate: Predicate<T>,
}

impl<T: Entity> Query<T> {
    /// Creates a query.
    pub fn new(remote: FetchQuery, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            remote,
            predicate: Arc::new(predicate),
        }
    }

    /// A query whose local result is every cached entity.
    pub fn all(remote: FetchQuery) -> Self {
        Self::new(remote, |_| true)
    }

    /// Deduplication key.
    pub fn key(&self) -> String {
        self.remote.key()
    }

    /// Remote half of the query.
    pub fn remote(&self) -> &FetchQuery {
        &self.remote
    }

    /// Local predicate.
    pub fn predicate(&self) -> Predicate<T> {
        Arc::clone(&self.predicate)
    }

    /// Returns true if `entity` belongs to the local result.
    pub fn matches(&self, entity: &T) -> bool {
        (self.predicate)(entity)
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}
