//! Scriptable in-process remote for tests and simulations.

use super::{CacheSnapshot, FetchQuery, RawMutation, RemoteClient};
use crate::entity::RemoteId;
use crate::error::RemoteError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// A call observed by a [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// `fetch` with the query key.
    Fetch(String),
    /// `submit` with the full mutation.
    Submit(RawMutation),
}

#[derive(Default)]
struct Script {
    fetch_queue: HashMap<String, VecDeque<Result<CacheSnapshot, RemoteError>>>,
    fetch_default: HashMap<String, Result<CacheSnapshot, RemoteError>>,
    submit_queue: VecDeque<Result<RemoteId, RemoteError>>,
    submit_default: Option<RemoteError>,
    latency: Duration,
    calls: Vec<RemoteCall>,
}

/// A [`RemoteClient`] whose answers are scripted.
///
/// Fetch answers are looked up by query key: queued one-shot answers first,
/// then the sticky default for the key. Submissions pop queued answers
/// first; otherwise they fail with the configured default error or succeed
/// with a fresh sequential remote id. Offline mode fails every call as
/// transient. Every call is recorded, including those that fail.
#[derive(Default)]
pub struct ScriptedRemote {
    script: Mutex<Script>,
    offline: AtomicBool,
    next_remote_id: AtomicU64,
}

impl ScriptedRemote {
    /// Creates a remote that accepts every submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a one-shot answer for the next fetch of `query`.
    pub fn push_fetch(&self, query: &FetchQuery, answer: Result<CacheSnapshot, RemoteError>) {
        self.script
            .lock()
            .fetch_queue
            .entry(query.key())
            .or_default()
            .push_back(answer);
    }

    /// Sets the answer for every fetch of `query` with nothing queued.
    pub fn set_fetch(&self, query: &FetchQuery, answer: Result<CacheSnapshot, RemoteError>) {
        self.script.lock().fetch_default.insert(query.key(), answer);
    }

    /// Queues a one-shot answer for the next submission.
    pub fn push_submit(&self, answer: Result<RemoteId, RemoteError>) {
        self.script.lock().submit_queue.push_back(answer);
    }

    /// Makes every unscripted submission fail with `error`, or succeed again
    /// when `None`.
    pub fn set_submit_failure(&self, error: Option<RemoteError>) {
        self.script.lock().submit_default = error;
    }

    /// Simulates lost connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().latency = latency;
    }

    /// All calls observed so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.script.lock().calls.clone()
    }

    /// Number of fetches observed for `query`.
    pub fn fetch_count(&self, query: &FetchQuery) -> usize {
        let key = query.key();
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RemoteCall::Fetch(k) if *k == key))
            .count()
    }

    /// Submissions observed so far, in arrival order.
    pub fn submissions(&self) -> Vec<RawMutation> {
        self.script
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RemoteCall::Submit(m) => Some(m.clone()),
                RemoteCall::Fetch(_) => None,
            })
            .collect()
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    fn latency(&self) -> Duration {
        self.script.lock().latency
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn fetch(&self, query: &FetchQuery) -> Result<CacheSnapshot, RemoteError> {
        let key = query.key();
        self.script.lock().calls.push(RemoteCall::Fetch(key.clone()));

        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.is_offline() {
            return Err(RemoteError::Transient("offline".into()));
        }

        let mut script = self.script.lock();
        if let Some(answer) = script.fetch_queue.get_mut(&key).and_then(VecDeque::pop_front) {
            return answer;
        }
        script
            .fetch_default
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::Unknown(format!("no scripted answer for {key}"))))
    }

    async fn submit(&self, mutation: &RawMutation) -> Result<RemoteId, RemoteError> {
        self.script
            .lock()
            .calls
            .push(RemoteCall::Submit(mutation.clone()));

        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.is_offline() {
            return Err(RemoteError::Transient("offline".into()));
        }

        let mut script = self.script.lock();
        if let Some(answer) = script.submit_queue.pop_front() {
            return answer;
        }
        if let Some(error) = &script.submit_default {
            return Err(error.clone());
        }
        if let Some(target) = &mutation.target {
            return Ok(target.clone());
        }
        let n = self.next_remote_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RemoteId::new(format!("r{n}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, EntityKind};
    use crate::remote::MutationKind;
    use chrono::Utc;
    use serde_json::json;

    fn mutation(target: Option<RemoteId>) -> RawMutation {
        RawMutation {
            kind: EntityKind::Sale,
            operation: MutationKind::Create,
            local_id: EntityId::from_u128(1),
            target,
            payload: json!({"total_cents": 100}),
        }
    }

    #[tokio::test]
    async fn fetch_queue_then_default() {
        let remote = ScriptedRemote::new();
        let query = FetchQuery::new(EntityKind::Product, "catalog");
        let now = Utc::now();

        remote.push_fetch(&query, Err(RemoteError::timeout()));
        remote.set_fetch(&query, Ok(CacheSnapshot::new(now, Vec::new())));

        assert!(remote.fetch(&query).await.unwrap_err().is_transient());
        assert!(remote.fetch(&query).await.is_ok());
        assert!(remote.fetch(&query).await.is_ok());
        assert_eq!(remote.fetch_count(&query), 3);

        let other = FetchQuery::new(EntityKind::Product, "other");
        assert!(matches!(
            remote.fetch(&other).await,
            Err(RemoteError::Unknown(_))
        ));
    }

    #[tokio::test]
    async fn submit_assigns_sequential_ids() {
        let remote = ScriptedRemote::new();
        assert_eq!(remote.submit(&mutation(None)).await.unwrap().as_str(), "r1");
        assert_eq!(remote.submit(&mutation(None)).await.unwrap().as_str(), "r2");
        let target = RemoteId::new("42");
        assert_eq!(
            remote.submit(&mutation(Some(target.clone()))).await.unwrap(),
            target
        );
        assert_eq!(remote.submissions().len(), 3);
    }

    #[tokio::test]
    async fn offline_and_default_failure() {
        let remote = ScriptedRemote::new();
        remote.set_offline(true);
        assert!(remote.submit(&mutation(None)).await.unwrap_err().is_transient());

        remote.set_offline(false);
        remote.set_submit_failure(Some(RemoteError::Unauthenticated));
        assert_eq!(
            remote.submit(&mutation(None)).await.unwrap_err(),
            RemoteError::Unauthenticated
        );

        remote.set_submit_failure(None);
        assert!(remote.submit(&mutation(None)).await.is_ok());
    }
}
