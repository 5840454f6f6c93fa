//! Pending-request bookkeeping.
//!
//! Each request that expects a reply parks a oneshot sender here under its
//! correlation key. The inbound router settles the entry when the matching
//! response arrives; the entry is removed on every settle path.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use super::error::{WorkerError, WorkerResult};
use super::protocol::{ErrorInfo, QueryKey, Response};

type Continuation = oneshot::Sender<WorkerResult<Response>>;

/// Receiving half of a pending entry.
pub type ReplyReceiver = oneshot::Receiver<WorkerResult<Response>>;

/// Outcome of settling an inbound response.
#[derive(Debug, PartialEq)]
pub enum Settlement {
    /// The waiting caller received the response.
    Delivered,
    /// The entry existed but its caller stopped waiting.
    Abandoned,
    /// An error arrived that no pending request can claim.
    StrayError(ErrorInfo),
    /// A non-error response arrived that no pending request can claim.
    Ignored,
}

/// Map of correlation keys to the continuations waiting on them.
#[derive(Default)]
pub struct PendingRequests {
    entries: DashMap<QueryKey, Continuation>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a continuation under `key`.
    pub fn register(&self, key: QueryKey) -> WorkerResult<ReplyReceiver> {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Err(WorkerError::DuplicateQueryKey(entry.key().clone())),
            Entry::Vacant(entry) => {
                let (tx, rx) = oneshot::channel();
                entry.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Drop an entry whose request never reached the worker.
    pub fn discard(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Deliver `response` to the continuation registered under its key.
    pub fn settle(&self, response: Response) -> Settlement {
        let entry = response
            .query_key()
            .and_then(|key| self.entries.remove(key));

        let Some((_, continuation)) = entry else {
            return match response {
                Response::Error { error, .. } => Settlement::StrayError(error),
                _ => Settlement::Ignored,
            };
        };

        let outcome = match response {
            Response::Error { error, .. } => Err(WorkerError::from(error)),
            other => Ok(other),
        };

        match continuation.send(outcome) {
            Ok(()) => Settlement::Delivered,
            Err(_) => Settlement::Abandoned,
        }
    }

    /// Fail every pending request with the error produced by `make_error`.
    pub fn fail_all(&self, make_error: impl Fn() -> WorkerError) -> usize {
        let keys: Vec<QueryKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for key in keys {
            if let Some((_, continuation)) = self.entries.remove(&key) {
                let _ = continuation.send(Err(make_error()));
                failed += 1;
            }
        }
        failed
    }

    /// Remove every entry without invoking it. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
