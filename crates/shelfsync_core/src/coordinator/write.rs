//! Write path: commit locally, then submit in the background.
//!
//! Submissions for one entity id run through a FIFO lane: a single worker
//! task per id drains the lane in commit order and exits when it is empty.
//! Mutations that fail are retained on the lane until `resync`, a newer
//! commit for the same id, or an explicit `discard`.

use super::{Shared, SyncCoordinator, SyncEvent, SyncFailure, SyncTask};
use crate::entity::{Entity, EntityId, RemoteId, SyncStatus};
use crate::error::{ReconcileError, StoreError, SyncError, SyncResult};
use crate::reconcile::EntityReconciler;
use crate::remote::MutationKind;
use futures_util::stream::{self, Stream};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct Job<E> {
    task: SyncTask,
    entity: E,
}

struct Lane<E> {
    queue: VecDeque<Job<E>>,
    current: Option<SyncTask>,
    retained: Vec<Job<E>>,
    running: bool,
}

impl<E> Default for Lane<E> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            retained: Vec::new(),
            running: false,
        }
    }
}

impl<E> Lane<E> {
    fn is_idle(&self) -> bool {
        !self.running && self.queue.is_empty() && self.retained.is_empty()
    }

    /// Moves retained jobs back to the queue. Only valid while idle, so the
    /// retained jobs are older than anything queued.
    fn requeue_retained(&mut self) -> usize {
        let count = self.retained.len();
        for mut job in self.retained.drain(..) {
            job.task.reset();
            self.queue.push_back(job);
        }
        count
    }
}

/// Submission lanes keyed by entity id.
pub(crate) struct Lanes<E> {
    by_id: HashMap<EntityId, Lane<E>>,
}

impl<E> Default for Lanes<E> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
        }
    }
}

impl<E> Lanes<E> {
    /// Queues `job`. Returns true if the caller must start the lane worker.
    fn enqueue(&mut self, id: EntityId, job: Job<E>) -> bool {
        let lane = self.by_id.entry(id).or_default();
        if !lane.running {
            lane.requeue_retained();
        }
        lane.queue.push_back(job);
        !std::mem::replace(&mut lane.running, true)
    }

    fn next_job(&mut self, id: EntityId) -> Option<Job<E>> {
        let lane = self.by_id.get_mut(&id)?;
        match lane.queue.pop_front() {
            Some(job) => {
                lane.current = Some(job.task.clone());
                Some(job)
            }
            None => {
                lane.running = false;
                lane.current = None;
                if lane.is_idle() {
                    self.by_id.remove(&id);
                }
                None
            }
        }
    }
}

impl<R: EntityReconciler> SyncCoordinator<R> {
    /// Commits `entity` locally as `Pending` and submits it in the
    /// background.
    ///
    /// Returns as soon as the local write is done. Only a foreground
    /// precondition (an empty mutation, an undecodable entity) fails the
    /// call; remote failures are reported through the entity's status.
    pub fn commit(&self, entity: R::Entity, operation: MutationKind) -> SyncResult<EntityId> {
        let id = entity.id();
        self.commit_all(vec![entity], operation)?;
        Ok(id)
    }

    /// Commits a batch atomically: every entity is stored or none is. Each
    /// entity gets its own sync task.
    pub fn commit_all(
        &self,
        entities: Vec<R::Entity>,
        operation: MutationKind,
    ) -> SyncResult<Vec<EntityId>> {
        for entity in &entities {
            self.validate(entity, operation)?;
        }
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let shared = &self.shared;
        let now = shared.now();
        let mut start = Vec::new();
        let mut lanes = shared.lanes.lock();

        let mut committed = Vec::with_capacity(entities.len());
        for mut entity in entities {
            // Sync bookkeeping is owned by the store, not by the caller's copy.
            if let Some(current) = shared.store.get(entity.id())? {
                *entity.meta_mut() = current.meta().clone();
            }
            entity.meta_mut().mark_pending()?;
            committed.push(entity);
        }
        shared.store.upsert_all(committed.clone())?;

        let ids: Vec<EntityId> = committed.iter().map(Entity::id).collect();
        for entity in committed {
            let id = entity.id();
            let job = Job {
                task: SyncTask::new(id, R::Entity::KIND, operation, now),
                entity,
            };
            if lanes.enqueue(id, job) {
                start.push(id);
            }
        }
        drop(lanes);

        debug!(kind = %R::Entity::KIND, count = ids.len(), ?operation, "committed locally");
        for id in start {
            self.spawn_lane(id);
        }
        Ok(ids)
    }

    /// Applies `change` to the stored entity under the store's write lock,
    /// marks it `Pending` and submits it.
    ///
    /// Use for narrow updates such as stock counters, where a
    /// read-modify-write through [`commit`](Self::commit) could race a
    /// concurrent merge.
    pub fn update_and_commit(
        &self,
        id: EntityId,
        operation: MutationKind,
        mut change: impl FnMut(&mut R::Entity),
    ) -> SyncResult<R::Entity> {
        let shared = &self.shared;
        let now = shared.now();
        let mut lanes = shared.lanes.lock();

        let mut transition = Ok(());
        let updated = shared
            .store
            .update_field(id, &mut |entity| {
                change(entity);
                transition = entity.meta_mut().mark_pending();
            })
            .map_err(|e| match e {
                StoreError::NotFound(id) => SyncError::EntityNotFound {
                    kind: R::Entity::KIND,
                    id,
                },
                other => other.into(),
            })?;
        transition?;

        let job = Job {
            task: SyncTask::new(id, R::Entity::KIND, operation, now),
            entity: updated.clone(),
        };
        let start = lanes.enqueue(id, job);
        drop(lanes);

        if start {
            self.spawn_lane(id);
        }
        Ok(updated)
    }

    /// Re-attempts every retained task of this kind from attempt 0.
    ///
    /// Returns the number of tasks re-queued. Lanes still draining newer
    /// commits are left alone; their outcome supersedes the retained task.
    pub fn resync(&self) -> usize {
        let shared = &self.shared;
        let mut lanes = shared.lanes.lock();
        let mut start = Vec::new();
        let mut count = 0;

        for (id, lane) in lanes.by_id.iter_mut() {
            if lane.running || lane.retained.is_empty() {
                continue;
            }
            count += lane.requeue_retained();
            lane.running = true;
            start.push(*id);

            let mut transition = Ok(());
            let result = shared.store.update_field(*id, &mut |entity| {
                if entity.sync_status() == SyncStatus::Failed {
                    transition = entity.meta_mut().mark_pending();
                }
            });
            if let Err(error) = result.map_err(SyncError::from).and(transition) {
                warn!(kind = %R::Entity::KIND, id = %id, error = %error, "resync could not mark entity pending");
            }
            shared.publish(SyncEvent::StatusChanged {
                kind: R::Entity::KIND,
                id: *id,
                status: SyncStatus::Pending,
            });
        }
        drop(lanes);

        info!(kind = %R::Entity::KIND, count, "resync");
        for id in start {
            self.spawn_lane(id);
        }
        count
    }

    /// Removes the queued and retained tasks of `id`. A submission already
    /// in flight is not interrupted.
    ///
    /// Returns the number of tasks removed. The local entity is kept as is.
    pub fn discard(&self, id: EntityId) -> usize {
        let mut lanes = self.shared.lanes.lock();
        let Some(lane) = lanes.by_id.get_mut(&id) else {
            return 0;
        };
        let removed = lane.queue.len() + lane.retained.len();
        lane.queue.clear();
        lane.retained.clear();
        if lane.is_idle() {
            lanes.by_id.remove(&id);
        }
        info!(kind = %R::Entity::KIND, id = %id, removed, "discarded sync tasks");
        removed
    }

    /// Tasks queued or in flight, in no particular order across ids.
    pub fn pending_tasks(&self) -> Vec<SyncTask> {
        let lanes = self.shared.lanes.lock();
        lanes
            .by_id
            .values()
            .flat_map(|lane| {
                lane.current
                    .iter()
                    .cloned()
                    .chain(lane.queue.iter().map(|job| job.task.clone()))
            })
            .collect()
    }

    /// Tasks retained after a failed submission.
    pub fn failed_tasks(&self) -> Vec<SyncTask> {
        let lanes = self.shared.lanes.lock();
        lanes
            .by_id
            .values()
            .flat_map(|lane| lane.retained.iter().map(|job| job.task.clone()))
            .collect()
    }

    /// Sync status of `id`, starting with the current one and then every
    /// change. Ends when the entity is removed or the store is dropped.
    pub fn status_stream(&self, id: EntityId) -> impl Stream<Item = SyncStatus> + Send {
        let subscription = self
            .shared
            .store
            .subscribe(Arc::new(move |e: &R::Entity| e.id() == id));
        let initial = subscription.current().first().map(Entity::sync_status);

        stream::unfold(
            (subscription, initial, true),
            |(mut subscription, last, first)| async move {
                if first {
                    if let Some(status) = last {
                        return Some((status, (subscription, last, false)));
                    }
                }
                loop {
                    let current = subscription.next().await?;
                    let status = current.first()?.sync_status();
                    if Some(status) != last {
                        return Some((status, (subscription, Some(status), false)));
                    }
                }
            },
        )
    }

    fn validate(&self, entity: &R::Entity, operation: MutationKind) -> SyncResult<()> {
        match self.shared.reconciler.to_mutation(entity, operation) {
            Ok(mutation) if mutation.is_empty() => Err(SyncError::EmptyMutation(R::Entity::KIND)),
            // The lane resolves the remote id at submission time.
            Ok(_) | Err(ReconcileError::MissingRemoteId { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn spawn_lane(&self, id: EntityId) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.run_lane(id).await });
    }
}

impl<R: EntityReconciler> Shared<R> {
    async fn run_lane(&self, id: EntityId) {
        loop {
            let next = self.lanes.lock().next_job(id);
            let Some(job) = next else {
                return;
            };
            let result = self.submit(&job).await;
            self.settle(job, result);
        }
    }

    async fn submit(&self, job: &Job<R::Entity>) -> SyncResult<RemoteId> {
        let id = job.task.entity_id;
        // Address the record with the latest confirmed remote id, which an
        // earlier submission in this lane may have just produced.
        let mut view = job.entity.clone();
        if let Some(current) = self.store.get(id)? {
            *view.meta_mut() = current.meta().clone();
        }
        let mutation = self.reconciler.to_mutation(&view, job.task.operation)?;
        if mutation.is_empty() {
            return Err(SyncError::EmptyMutation(R::Entity::KIND));
        }

        debug!(kind = %R::Entity::KIND, id = %id, operation = ?job.task.operation, "submitting");
        self.with_retry(
            "submit",
            || self.remote.submit(&mutation),
            |attempts, delay| self.note_retry(id, attempts, delay),
        )
        .await
    }

    fn note_retry(&self, id: EntityId, attempts: u32, delay: Duration) {
        let next = chrono::Duration::from_std(delay)
            .ok()
            .map(|delay| self.now() + delay);
        let mut lanes = self.lanes.lock();
        if let Some(task) = lanes.by_id.get_mut(&id).and_then(|l| l.current.as_mut()) {
            task.attempt_count = attempts;
            task.next_eligible_at = next;
        }
    }

    fn settle(&self, mut job: Job<R::Entity>, result: SyncResult<RemoteId>) {
        let id = job.task.entity_id;
        let kind = R::Entity::KIND;
        let now = self.now();
        let mut lanes = self.lanes.lock();
        let Some(lane) = lanes.by_id.get_mut(&id) else {
            return;
        };
        if let Some(current) = lane.current.take() {
            job.task = current;
        }
        job.task.attempt_count += 1;
        job.task.next_eligible_at = None;
        let superseded = !lane.queue.is_empty();

        match result {
            Ok(remote_id) => {
                lane.retained.clear();
                let mut transition = Ok(());
                let stored = self.store.update_field(id, &mut |entity| {
                    if superseded {
                        entity.meta_mut().record_remote_id(remote_id.clone());
                    } else {
                        transition = entity.meta_mut().mark_synced(remote_id.clone(), now);
                    }
                });
                match stored.map_err(SyncError::from).and(transition) {
                    Ok(_) => {}
                    Err(SyncError::Store(StoreError::NotFound(_))) => {
                        debug!(kind = %kind, id = %id, "entity removed before confirmation");
                    }
                    Err(error) => {
                        warn!(kind = %kind, id = %id, error = %error, "could not record confirmation");
                    }
                }
                {
                    let mut stats = self.stats.write();
                    stats.submissions_succeeded += 1;
                }
                self.touch_last_synced(now);
                info!(kind = %kind, id = %id, remote_id = %remote_id, "submission confirmed");
                if !superseded {
                    self.publish(SyncEvent::StatusChanged {
                        kind,
                        id,
                        status: SyncStatus::Synced,
                    });
                }
            }
            Err(error) => {
                lane.retained.push(job);
                {
                    let mut stats = self.stats.write();
                    stats.submissions_failed += 1;
                }
                self.record_error(&error);
                warn!(kind = %kind, id = %id, error = %error, "submission failed, task retained");

                if !superseded {
                    let mut transition = Ok(());
                    let stored = self.store.update_field(id, &mut |entity| {
                        transition = entity.meta_mut().mark_failed();
                    });
                    if let Err(e) = stored.map_err(SyncError::from).and(transition) {
                        debug!(kind = %kind, id = %id, error = %e, "could not mark entity failed");
                    }
                    self.publish(SyncEvent::StatusChanged {
                        kind,
                        id,
                        status: SyncStatus::Failed,
                    });
                }
                self.publish(SyncEvent::SubmitFailed {
                    kind,
                    id,
                    failure: SyncFailure::new(error, now),
                });
            }
        }
    }
}
