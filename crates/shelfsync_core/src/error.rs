//! Error types for the sync core.

use crate::entity::{EntityId, EntityKind, SyncStatus};
use thiserror::Error;

/// Result type for coordinator operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for reconciliation.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors raised by a [`LocalStore`](crate::LocalStore) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No entity with the given id.
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    /// A batch contained the same id twice.
    #[error("conflicting writes for entity {0} in one batch")]
    Conflict(EntityId),

    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors returned by a [`RemoteClient`](crate::RemoteClient).
///
/// Classification happens once, where the transport produces the failure.
/// Nothing deeper in the stack inspects messages or codes to decide whether
/// to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Timeout, unreachable host or server-side failure. Retriable.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The remote refused the request (validation, conflict).
    #[error("remote rejected request with code {code}: {message}")]
    Rejected {
        /// Application or HTTP status code.
        code: u16,
        /// Message returned by the remote.
        message: String,
    },

    /// Credentials missing or expired.
    #[error("not authenticated with remote")]
    Unauthenticated,

    /// Anything the transport could not classify.
    #[error("unknown remote failure: {0}")]
    Unknown(String),
}

impl RemoteError {
    /// Classifies an HTTP status code.
    ///
    /// 401 and 403 map to [`RemoteError::Unauthenticated`]; 408, 429 and 5xx
    /// are transient; any other 4xx is a rejection.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => RemoteError::Unauthenticated,
            408 | 429 | 500..=599 => RemoteError::Transient(format!("HTTP {status}: {message}")),
            400..=499 => RemoteError::Rejected {
                code: status,
                message,
            },
            _ => RemoteError::Unknown(format!("HTTP {status}: {message}")),
        }
    }

    /// Creates a transient error for a timed out call.
    pub fn timeout() -> Self {
        RemoteError::Transient("request timed out".into())
    }

    /// Returns true if the failure may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Errors produced while translating between wire and cache representation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The payload did not match the expected shape.
    #[error("invalid {kind} payload: {message}")]
    Payload {
        /// Entity kind being decoded.
        kind: EntityKind,
        /// Decoder message.
        message: String,
    },

    /// An update was requested for an entity the remote never confirmed.
    #[error("{kind} {id} has no confirmed remote id")]
    MissingRemoteId {
        /// Entity kind.
        kind: EntityKind,
        /// Local id.
        id: EntityId,
    },
}

impl ReconcileError {
    pub(crate) fn payload(kind: EntityKind, err: serde_json::Error) -> Self {
        ReconcileError::Payload {
            kind,
            message: err.to_string(),
        }
    }
}

/// Errors surfaced at the coordinator boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A commit carried nothing to submit.
    #[error("empty mutation for {0}")]
    EmptyMutation(EntityKind),

    /// Checkout with no cart lines.
    #[error("cart is empty")]
    EmptyCart,

    /// A line subtotal or the sale total does not fit in `i64` cents.
    #[error("sale amount overflows")]
    AmountOverflow,

    /// The referenced entity is not in the local store.
    #[error("{kind} {id} not found")]
    EntityNotFound {
        /// Entity kind.
        kind: EntityKind,
        /// Local id.
        id: EntityId,
    },

    /// Illegal sync lifecycle transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current status.
        from: SyncStatus,
        /// Attempted status.
        to: SyncStatus,
    },

    /// Transient failures persisted past the attempt budget.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last transient failure.
        last: RemoteError,
    },

    /// Non-retriable remote failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Wire translation failure.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// The operation was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// No coordinator registered for the kind.
    #[error("no coordinator registered for {0}")]
    UnknownKind(EntityKind),
}

impl SyncError {
    /// Returns true if a later attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RetriesExhausted { .. } => true,
            SyncError::Remote(e) => e.is_transient(),
            _ => false,
        }
    }
}
