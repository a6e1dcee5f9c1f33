//! Per-kind reconciliation between remote records and cached entities.

mod product;
mod sale;

pub use product::ProductReconciler;
pub use sale::SaleReconciler;

use crate::entity::{Entity, RemoteId, SyncMeta};
use crate::error::{ReconcileResult, SyncResult};
use crate::remote::{CacheSnapshot, MutationKind, RawMutation, RawRecord};
use crate::store::{LocalStore, Query, StoreWrite};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// How a fresh snapshot relates to what is already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStrategy {
    /// Catalog-style: an authoritative snapshot is the complete set, so
    /// synced records missing from it are pruned.
    FullReplace,
    /// Event-style: remote pages never delete local history.
    AdditiveOnly,
}

/// Translation and merge policy for one entity kind.
pub trait EntityReconciler: Send + Sync + 'static {
    /// Entity type handled.
    type Entity: Entity;

    /// Replace strategy for this kind.
    fn strategy(&self) -> ReplaceStrategy;

    /// Builds the cached entity for `remote`, keeping the id and any
    /// local-only fields of `local` when present.
    ///
    /// Implementations only translate; sync metadata is set by
    /// [`merge`](EntityReconciler::merge).
    fn apply(
        &self,
        local: Option<&Self::Entity>,
        remote: &RawRecord,
    ) -> ReconcileResult<Self::Entity>;

    /// Builds the outbound mutation for `local`.
    fn to_mutation(
        &self,
        local: &Self::Entity,
        kind: MutationKind,
    ) -> ReconcileResult<RawMutation>;

    /// Merges one remote record taken at `snapshot_at` into `local`.
    ///
    /// Deterministic and side-effect free. The local value is returned
    /// unchanged when:
    /// - it carries edits the remote has not confirmed yet, or
    /// - the snapshot is older than its `last_synced_at`.
    fn merge(
        &self,
        local: Option<&Self::Entity>,
        remote: &RawRecord,
        snapshot_at: DateTime<Utc>,
    ) -> ReconcileResult<Self::Entity> {
        if let Some(local) = local {
            if local.sync_status().has_unconfirmed_changes() {
                return Ok(local.clone());
            }
            if local
                .meta()
                .last_synced_at()
                .is_some_and(|synced| snapshot_at < synced)
            {
                return Ok(local.clone());
            }
        }
        let mut merged = self.apply(local, remote)?;
        *merged.meta_mut() = SyncMeta::confirmed(remote.remote_id.clone(), snapshot_at);
        Ok(merged)
    }
}

/// Outcome of merging one snapshot into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records inserted or refreshed.
    pub merged: usize,
    /// Records already up to date or protected by local edits.
    pub unchanged: usize,
    /// Records that failed to decode.
    pub skipped: usize,
    /// Cached records pruned by a full replace.
    pub pruned: usize,
}

/// Merges `snapshot` into `store` for `query`.
///
/// Every merge decision is made against the value stored at commit time:
/// the whole merge, pruning included, runs inside one
/// [`LocalStore::transact`], so a local edit committed while the fetch was
/// in flight is seen and kept. Pruning runs only for
/// [`ReplaceStrategy::FullReplace`] on authoritative queries and only
/// removes records that are synced and absent from the snapshot.
pub(crate) fn merge_snapshot<R: EntityReconciler>(
    reconciler: &R,
    store: &dyn LocalStore<R::Entity>,
    query: &Query<R::Entity>,
    snapshot: &CacheSnapshot,
) -> SyncResult<MergeReport> {
    let prune = reconciler.strategy() == ReplaceStrategy::FullReplace && query.remote().authoritative;
    let mut report = MergeReport::default();
    store.transact(&mut |current: &[&R::Entity]| {
        report = MergeReport::default();
        plan_merge(reconciler, query, snapshot, prune, current, &mut report)
    })?;

    debug!(
        kind = %R::Entity::KIND,
        merged = report.merged,
        unchanged = report.unchanged,
        skipped = report.skipped,
        pruned = report.pruned,
        "snapshot merged"
    );
    Ok(report)
}

fn plan_merge<R: EntityReconciler>(
    reconciler: &R,
    query: &Query<R::Entity>,
    snapshot: &CacheSnapshot,
    prune: bool,
    current: &[&R::Entity],
    report: &mut MergeReport,
) -> Vec<StoreWrite<R::Entity>> {
    let known: HashMap<&RemoteId, &R::Entity> = current
        .iter()
        .copied()
        .filter_map(|e| e.meta().confirmed_remote_id().map(|rid| (rid, e)))
        .collect();

    let mut writes = Vec::new();
    let mut seen: HashSet<&RemoteId> = HashSet::with_capacity(snapshot.records.len());
    for record in &snapshot.records {
        if !seen.insert(&record.remote_id) {
            continue;
        }
        let local = known.get(&record.remote_id).copied();
        match reconciler.merge(local, record, snapshot.taken_at) {
            Ok(merged) if local == Some(&merged) => report.unchanged += 1,
            Ok(merged) => writes.push(StoreWrite::Upsert(merged)),
            Err(e) => {
                warn!(remote_id = %record.remote_id, error = %e, "skipping undecodable record");
                report.skipped += 1;
            }
        }
    }
    report.merged = writes.len();

    if prune {
        for entity in current.iter().copied() {
            let stale = query.matches(entity)
                && !entity.sync_status().has_unconfirmed_changes()
                && entity
                    .meta()
                    .confirmed_remote_id()
                    .is_some_and(|rid| !seen.contains(rid));
            if stale {
                writes.push(StoreWrite::Remove(entity.id()));
                report.pruned += 1;
            }
        }
    }
    writes
}
