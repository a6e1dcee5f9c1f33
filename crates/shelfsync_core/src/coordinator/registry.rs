//! Status queries and resync across entity kinds.

use super::SyncCoordinator;
use crate::entity::{Entity, EntityKind};
use crate::error::{SyncError, SyncResult};
use crate::reconcile::EntityReconciler;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Kind-erased view of a coordinator.
pub trait KindSync: Send + Sync {
    /// Kind handled.
    fn kind(&self) -> EntityKind;

    /// Re-attempts retained tasks. Returns how many were re-queued.
    fn resync(&self) -> usize;

    /// Entities awaiting confirmation.
    fn pending_count(&self) -> SyncResult<usize>;

    /// Entities whose last submission failed.
    fn failed_count(&self) -> SyncResult<usize>;

    /// Time of the last successful sync.
    fn last_synced_at(&self) -> Option<DateTime<Utc>>;
}

impl<R: EntityReconciler> KindSync for SyncCoordinator<R> {
    fn kind(&self) -> EntityKind {
        R::Entity::KIND
    }

    fn resync(&self) -> usize {
        SyncCoordinator::resync(self)
    }

    fn pending_count(&self) -> SyncResult<usize> {
        SyncCoordinator::pending_count(self)
    }

    fn failed_count(&self) -> SyncResult<usize> {
        SyncCoordinator::failed_count(self)
    }

    fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        SyncCoordinator::last_synced_at(self)
    }
}

/// Routes operator requests to the coordinator of each kind.
#[derive(Default, Clone)]
pub struct SyncRegistry {
    kinds: BTreeMap<EntityKind, Arc<dyn KindSync>>,
}

impl SyncRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a coordinator, replacing any previous one for its kind.
    pub fn register(&mut self, sync: Arc<dyn KindSync>) {
        self.kinds.insert(sync.kind(), sync);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, sync: Arc<dyn KindSync>) -> Self {
        self.register(sync);
        self
    }

    /// Registered kinds.
    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.kinds.keys().copied()
    }

    /// Re-attempts every retained task of `kind`.
    pub fn resync(&self, kind: EntityKind) -> SyncResult<usize> {
        Ok(self.get(kind)?.resync())
    }

    /// Re-attempts retained tasks of every kind.
    pub fn resync_all(&self) -> usize {
        self.kinds.values().map(|k| k.resync()).sum()
    }

    /// Entities awaiting confirmation, across kinds.
    pub fn pending_count(&self) -> SyncResult<usize> {
        self.kinds.values().map(|k| k.pending_count()).sum()
    }

    /// Entities whose last submission failed, across kinds.
    pub fn failed_count(&self) -> SyncResult<usize> {
        self.kinds.values().map(|k| k.failed_count()).sum()
    }

    /// Time of the last successful sync of `kind`.
    pub fn last_synced_at(&self, kind: EntityKind) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self.get(kind)?.last_synced_at())
    }

    fn get(&self, kind: EntityKind) -> SyncResult<&Arc<dyn KindSync>> {
        self.kinds.get(&kind).ok_or(SyncError::UnknownKind(kind))
    }
}

impl std::fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRegistry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}
