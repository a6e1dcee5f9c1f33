//! Sync bookkeeping types shared by the read and write paths.

use crate::entity::{EntityId, EntityKind, SyncStatus};
use crate::error::{RemoteError, SyncError};
use crate::reconcile::MergeReport;
use crate::remote::MutationKind;
use chrono::{DateTime, Utc};

/// One outbound mutation awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    /// Local id of the entity.
    pub entity_id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Create or update.
    pub operation: MutationKind,
    /// Submit attempts made so far.
    pub attempt_count: u32,
    /// Earliest time of the next attempt, while backing off.
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// When the mutation was committed locally.
    pub committed_at: DateTime<Utc>,
}

impl SyncTask {
    pub(crate) fn new(
        entity_id: EntityId,
        kind: EntityKind,
        operation: MutationKind,
        committed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id,
            kind,
            operation,
            attempt_count: 0,
            next_eligible_at: None,
            committed_at,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.attempt_count = 0;
        self.next_eligible_at = None;
    }
}

/// A failed background sync, as observed by status watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Classified error.
    pub error: SyncError,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

impl SyncFailure {
    pub(crate) fn new(error: SyncError, at: DateTime<Utc>) -> Self {
        Self { error, at }
    }

    /// Returns true if transient failures outlasted the retry budget.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self.error, SyncError::RetriesExhausted { .. })
    }

    /// Returns true if the caller should re-authenticate rather than retry.
    pub fn needs_authentication(&self) -> bool {
        matches!(
            self.error,
            SyncError::Remote(RemoteError::Unauthenticated)
                | SyncError::RetriesExhausted {
                    last: RemoteError::Unauthenticated,
                    ..
                }
        )
    }
}

/// Notifications published by a coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// An entity's sync status changed in the background.
    StatusChanged {
        /// Entity kind.
        kind: EntityKind,
        /// Local id.
        id: EntityId,
        /// New status.
        status: SyncStatus,
    },
    /// A read-through refresh merged a snapshot.
    FetchCompleted {
        /// Query key.
        key: String,
        /// Merge counters.
        report: MergeReport,
    },
    /// A read-through refresh failed. Cached data was left untouched.
    FetchFailed {
        /// Query key.
        key: String,
        /// Failure.
        failure: SyncFailure,
    },
    /// A submission failed. The entity is kept and its task retained.
    SubmitFailed {
        /// Entity kind.
        kind: EntityKind,
        /// Local id.
        id: EntityId,
        /// Failure.
        failure: SyncFailure,
    },
}

/// Counters describing coordinator activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Fetches sent to the remote.
    pub fetches_started: u64,
    /// Read-throughs that joined an in-flight fetch.
    pub fetches_joined: u64,
    /// Fetches whose snapshot was merged.
    pub fetches_completed: u64,
    /// Fetches that failed.
    pub fetches_failed: u64,
    /// Fetches aborted by cancellation.
    pub fetches_cancelled: u64,
    /// Submissions confirmed by the remote.
    pub submissions_succeeded: u64,
    /// Submissions that ended in failure.
    pub submissions_failed: u64,
    /// Backoff retries across fetches and submissions.
    pub retries: u64,
    /// Last failure message.
    pub last_error: Option<String>,
}
