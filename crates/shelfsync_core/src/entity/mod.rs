//! Synchronized entities and their sync lifecycle.

mod id;
mod product;
mod sale;

pub use id::{EntityId, RemoteId};
pub use product::Product;
pub use sale::{PaymentMethod, PaymentStatus, Sale, SaleItem};

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of synchronized entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Catalog products.
    Product,
    /// Sales with their line items.
    Sale,
    /// Revenue aggregates. Always derived from sales.
    FinancialSummary,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Product => "product",
            EntityKind::Sale => "sale",
            EntityKind::FinancialSummary => "financial_summary",
        })
    }
}

/// Sync status of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Created locally, never submitted.
    Local,
    /// Committed locally, awaiting remote confirmation.
    Pending,
    /// Confirmed by the remote.
    Synced,
    /// Submission failed; the mutation is retained for resync.
    Failed,
}

impl SyncStatus {
    /// Returns true if a transition from `self` to `to` is allowed.
    ///
    /// `Pending -> Pending` covers a second local edit while the first is
    /// still queued.
    pub fn can_transition_to(self, to: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, to),
            (Local, Pending)
                | (Pending, Pending)
                | (Pending, Synced)
                | (Pending, Failed)
                | (Failed, Pending)
                | (Synced, Pending)
                | (Synced, Synced)
        )
    }

    /// Returns true if the entity carries local changes the remote has not
    /// confirmed.
    pub fn has_unconfirmed_changes(self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

/// Sync bookkeeping carried by every entity.
///
/// Sync state lives on the entity itself rather than in a side table, so a
/// single upsert commits both the payload and its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMeta {
    status: SyncStatus,
    remote_id: Option<RemoteId>,
    last_synced_at: Option<DateTime<Utc>>,
}

impl SyncMeta {
    /// Metadata for an entity created on this device.
    pub fn local() -> Self {
        Self {
            status: SyncStatus::Local,
            remote_id: None,
            last_synced_at: None,
        }
    }

    /// Metadata for a record that arrived from the remote.
    pub fn confirmed(remote_id: RemoteId, at: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Synced,
            remote_id: Some(remote_id),
            last_synced_at: Some(at),
        }
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Remote id. Only present while the entity is synced.
    pub fn remote_id(&self) -> Option<&RemoteId> {
        match self.status {
            SyncStatus::Synced => self.remote_id.as_ref(),
            _ => None,
        }
    }

    /// Last remote id the server confirmed, kept across re-edits so update
    /// mutations can address the server record.
    pub fn confirmed_remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    /// Time of the last successful sync.
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    /// Moves to `Pending` after a local commit.
    pub fn mark_pending(&mut self) -> SyncResult<()> {
        self.transition(SyncStatus::Pending)
    }

    /// Moves to `Synced` after the remote accepted a submission.
    pub fn mark_synced(&mut self, remote_id: RemoteId, at: DateTime<Utc>) -> SyncResult<()> {
        self.transition(SyncStatus::Synced)?;
        self.remote_id = Some(remote_id);
        self.last_synced_at = Some(at);
        Ok(())
    }

    /// Records the id the remote assigned without changing status. Used when
    /// a newer local edit is still queued behind the confirmed submission.
    pub(crate) fn record_remote_id(&mut self, remote_id: RemoteId) {
        self.remote_id = Some(remote_id);
    }

    /// Moves to `Failed` after retries were exhausted or the remote refused.
    pub fn mark_failed(&mut self) -> SyncResult<()> {
        self.transition(SyncStatus::Failed)
    }

    fn transition(&mut self, to: SyncStatus) -> SyncResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(SyncError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

impl Default for SyncMeta {
    fn default() -> Self {
        Self::local()
    }
}

/// A record kept in sync between the local store and the remote.
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Kind shared by all values of this type.
    const KIND: EntityKind;

    /// Local identifier.
    fn id(&self) -> EntityId;

    /// Sync bookkeeping.
    fn meta(&self) -> &SyncMeta;

    /// Mutable sync bookkeeping.
    fn meta_mut(&mut self) -> &mut SyncMeta;

    /// Shorthand for `self.meta().status()`.
    fn sync_status(&self) -> SyncStatus {
        self.meta().status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut meta = SyncMeta::local();
        assert_eq!(meta.status(), SyncStatus::Local);
        assert!(meta.remote_id().is_none());

        meta.mark_pending().unwrap();
        assert_eq!(meta.status(), SyncStatus::Pending);

        meta.mark_synced(RemoteId::from(7_i64), at(10)).unwrap();
        assert_eq!(meta.status(), SyncStatus::Synced);
        assert_eq!(meta.remote_id(), Some(&RemoteId::from(7_i64)));
        assert_eq!(meta.last_synced_at(), Some(at(10)));
    }

    #[test]
    fn failed_then_resync() {
        let mut meta = SyncMeta::local();
        meta.mark_pending().unwrap();
        meta.mark_failed().unwrap();
        assert_eq!(meta.status(), SyncStatus::Failed);
        meta.mark_pending().unwrap();
        meta.mark_synced(RemoteId::from(1_i64), at(9)).unwrap();
    }

    #[test]
    fn remote_id_hidden_while_reedited() {
        let mut meta = SyncMeta::confirmed(RemoteId::from(3_i64), at(8));
        meta.mark_pending().unwrap();
        assert!(meta.remote_id().is_none());
        assert_eq!(meta.confirmed_remote_id(), Some(&RemoteId::from(3_i64)));
    }

    #[test]
    fn illegal_transitions() {
        let mut meta = SyncMeta::local();
        assert!(matches!(
            meta.mark_synced(RemoteId::from(1_i64), at(1)),
            Err(SyncError::InvalidStateTransition {
                from: SyncStatus::Local,
                to: SyncStatus::Synced
            })
        ));
        assert!(meta.mark_failed().is_err());

        let mut synced = SyncMeta::confirmed(RemoteId::from(1_i64), at(1));
        assert!(synced.mark_failed().is_err());
        assert!(!SyncStatus::Synced.can_transition_to(SyncStatus::Local));
        assert!(!SyncStatus::Failed.can_transition_to(SyncStatus::Synced));
    }
}
