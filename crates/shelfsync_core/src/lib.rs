//! # ShelfSync Core
//!
//! Offline-first synchronization between a local cache and a single remote
//! authority.
//!
//! This crate provides:
//! - Bounded exponential backoff ([`RetryPolicy`])
//! - The local cache contract ([`LocalStore`]) and an in-memory implementation
//! - The remote authority contract ([`RemoteClient`]) with classified errors
//! - Per-kind reconciliation between wire records and cached entities
//! - The [`SyncCoordinator`] driving read-through and local-first writes
//! - Retail entities (products, sales) and views derived from them
//!
//! ## Architecture
//!
//! Every operation touches the [`LocalStore`] synchronously first:
//! 1. Reads return cached results immediately, then refresh in the background
//! 2. Writes commit locally as `Pending`, then propagate with retry
//! 3. Remote snapshots are merged through an [`EntityReconciler`]
//! 4. The store's change feed notifies subscribers of every committed change
//!
//! ## Key Invariants
//!
//! - A read never waits on the network
//! - A committed write is never lost or rolled back
//! - At most one in-flight fetch per query key
//! - Submissions for one entity id reach the remote in commit order
//! - Aggregates are derived from synced base entities, never synced themselves

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod coordinator;
mod entity;
mod error;
mod reconcile;
mod remote;
mod retail;
mod retry;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FinancialSplit, SyncConfig};
pub use coordinator::{
    FetchHandle, FetchOutcome, KindSync, ReadThrough, SyncCoordinator, SyncEvent, SyncFailure,
    SyncRegistry, SyncStats, SyncTask,
};
pub use entity::{
    Entity, EntityId, EntityKind, PaymentMethod, PaymentStatus, Product, RemoteId, Sale, SaleItem,
    SyncMeta, SyncStatus,
};
pub use error::{
    ReconcileError, ReconcileResult, RemoteError, StoreError, StoreResult, SyncError, SyncResult,
};
pub use reconcile::{
    EntityReconciler, MergeReport, ProductReconciler, ReplaceStrategy, SaleReconciler,
};
pub use remote::{
    CacheSnapshot, FetchQuery, MutationKind, RawMutation, RawRecord, RemoteCall, RemoteClient,
    ScriptedRemote,
};
pub use retail::{
    catalog_query, CartLine, DerivedView, FinancialSummary, InventoryOverview, RetailSync,
    TodayStats, RECENT_SALES,
};
pub use retry::RetryPolicy;
pub use store::{
    ChangeEvent, ChangeType, LocalStore, MemoryStore, Query, StoreWrite, Subscription,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
