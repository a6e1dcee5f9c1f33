//! Remote authority contract.
//!
//! The core never sees a wire format. [`RawRecord`] and [`RawMutation`]
//! carry opaque JSON payloads that an
//! [`EntityReconciler`](crate::EntityReconciler) and the concrete
//! [`RemoteClient`] agree on.

mod scripted;

pub use scripted::{RemoteCall, ScriptedRemote};

use crate::entity::{EntityId, EntityKind, RemoteId};
use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The single remote source of truth.
///
/// Implementations classify every failure into a [`RemoteError`] before
/// returning it.
#[async_trait]
pub trait RemoteClient: Send + Sync + 'static {
    /// Fetches the remote result of `query`.
    async fn fetch(&self, query: &FetchQuery) -> Result<CacheSnapshot, RemoteError>;

    /// Submits a mutation, returning the remote id of the affected record.
    async fn submit(&self, mutation: &RawMutation) -> Result<RemoteId, RemoteError>;
}

/// Remote half of a read-through query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchQuery {
    /// Entity kind queried.
    pub kind: EntityKind,
    /// Query name understood by the remote (`catalog`, `by_barcode`, ...).
    pub name: String,
    /// Query parameters.
    pub params: BTreeMap<String, String>,
    /// The result is the complete remote set for this query, so cached
    /// records missing from it may be pruned.
    pub authoritative: bool,
}

impl FetchQuery {
    /// Creates a non-authoritative query.
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            params: BTreeMap::new(),
            authoritative: false,
        }
    }

    /// Adds a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Marks the query as returning the complete remote set.
    pub fn authoritative(mut self) -> Self {
        self.authoritative = true;
        self
    }

    /// Stable key identifying the query, used for in-flight deduplication.
    ///
    /// Reserved characters in the name and parameters are percent-escaped,
    /// and authoritative queries carry a `#full` suffix, so distinct
    /// queries never share a key.
    pub fn key(&self) -> String {
        let mut key = format!("{}/{}", self.kind, escape(&self.name));
        for (i, (k, v)) in self.params.iter().enumerate() {
            key.push(if i == 0 { '?' } else { '&' });
            key.push_str(&escape(k));
            key.push('=');
            key.push_str(&escape(v));
        }
        if self.authoritative {
            key.push_str("#full");
        }
        key
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            '/' => out.push_str("%2F"),
            c => out.push(c),
        }
    }
    out
}

/// One record as delivered by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Remote identifier.
    pub remote_id: RemoteId,
    /// Opaque payload.
    pub payload: serde_json::Value,
}

impl RawRecord {
    /// Creates a record.
    pub fn new(remote_id: impl Into<RemoteId>, payload: serde_json::Value) -> Self {
        Self {
            remote_id: remote_id.into(),
            payload,
        }
    }
}

/// The remote result of one query at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    /// When the remote produced the snapshot.
    pub taken_at: DateTime<Utc>,
    /// Records returned.
    pub records: Vec<RawRecord>,
}

impl CacheSnapshot {
    /// Creates a snapshot.
    pub fn new(taken_at: DateTime<Utc>, records: Vec<RawRecord>) -> Self {
        Self { taken_at, records }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the snapshot holds no record.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Kind of outbound mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// The remote has never seen the record.
    Create,
    /// The record already exists remotely.
    Update,
}

/// An outbound mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMutation {
    /// Entity kind.
    pub kind: EntityKind,
    /// Create or update.
    pub operation: MutationKind,
    /// Local id of the entity, usable by the remote as an idempotency key.
    pub local_id: EntityId,
    /// Remote record addressed by an update.
    pub target: Option<RemoteId>,
    /// Opaque payload.
    pub payload: serde_json::Value,
}

impl RawMutation {
    /// True if the mutation carries nothing to submit.
    pub fn is_empty(&self) -> bool {
        match &self.payload {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_key_is_stable() {
        let q = FetchQuery::new(EntityKind::Product, "search")
            .with_param("text", "milk")
            .with_param("limit", "20");
        assert_eq!(q.key(), "product/search?limit=20&text=milk");
        assert_eq!(FetchQuery::new(EntityKind::Sale, "today").key(), "sale/today");
    }

    #[test]
    fn query_key_separates_lookalike_queries() {
        let packed = FetchQuery::new(EntityKind::Product, "search").with_param("a", "1&b=2");
        let split = FetchQuery::new(EntityKind::Product, "search")
            .with_param("a", "1")
            .with_param("b", "2");
        assert_ne!(packed.key(), split.key());
        assert_eq!(packed.key(), "product/search?a=1%26b%3D2");

        let partial = FetchQuery::new(EntityKind::Product, "catalog");
        let full = partial.clone().authoritative();
        assert_ne!(partial.key(), full.key());
        assert_eq!(full.key(), "product/catalog#full");
    }

    #[test]
    fn empty_mutation() {
        let mut m = RawMutation {
            kind: EntityKind::Product,
            operation: MutationKind::Update,
            local_id: EntityId::from_u128(1),
            target: None,
            payload: json!({}),
        };
        assert!(m.is_empty());
        m.payload = serde_json::Value::Null;
        assert!(m.is_empty());
        m.payload = json!({"quantity": 3});
        assert!(!m.is_empty());
    }
}
