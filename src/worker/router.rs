//! Inbound message routing.
//!
//! Every response from the worker passes through [`InboundRouter::route`].
//! Callback notifications are dispatched to registered handlers before the
//! pending-request table is consulted, so a notification is never mistaken
//! for a stray reply.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::error::WorkerError;
use super::functions::CallbackRegistry;
use super::pending::{PendingRequests, Settlement};
use super::protocol::{ErrorInfo, Response, SqlValue};

/// Capacity of the stray-error broadcast channel.
const UNHANDLED_CAPACITY: usize = 64;

pub struct InboundRouter {
    pending: Arc<PendingRequests>,
    callbacks: Arc<CallbackRegistry>,
    unhandled: broadcast::Sender<ErrorInfo>,
}

impl InboundRouter {
    pub fn new(pending: Arc<PendingRequests>, callbacks: Arc<CallbackRegistry>) -> Self {
        let (unhandled, _) = broadcast::channel(UNHANDLED_CAPACITY);
        Self {
            pending,
            callbacks,
            unhandled,
        }
    }

    /// Subscribe to errors that arrived without a pending request to claim them.
    pub fn subscribe_unhandled(&self) -> broadcast::Receiver<ErrorInfo> {
        self.unhandled.subscribe()
    }

    pub fn route(&self, response: Response) {
        if let Response::Callback { name, args } = response {
            self.invoke_callback(&name, &args);
            return;
        }

        let kind = response.kind();
        let query_key = response.query_key().map(str::to_owned);
        match self.pending.settle(response) {
            Settlement::Delivered => {
                tracing::debug!(query_key = ?query_key, kind, "settled request");
            }
            Settlement::Abandoned => {
                tracing::debug!(query_key = ?query_key, kind, "caller stopped waiting for reply");
            }
            Settlement::Ignored => {
                tracing::debug!(query_key = ?query_key, kind, "ignoring unmatched reply");
            }
            Settlement::StrayError(error) => {
                tracing::error!(
                    query_key = ?query_key,
                    code = %error.code,
                    message = %error.message,
                    "worker error with no pending request"
                );
                let _ = self.unhandled.send(error);
            }
        }
    }

    fn invoke_callback(&self, name: &str, args: &[SqlValue]) {
        let Some(handler) = self.callbacks.get(name) else {
            tracing::debug!(function = name, "dropping callback with no registered handler");
            return;
        };

        if panic::catch_unwind(AssertUnwindSafe(|| handler(args))).is_err() {
            tracing::error!(function = name, "callback handler panicked");
        }
    }

    /// Spawn the background task that reads responses from the worker.
    ///
    /// When the worker's response stream ends, every request still pending is
    /// failed with [`WorkerError::WorkerExited`].
    pub fn spawn_reader_task(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<Response>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(response) = inbound.recv().await {
                self.route(response);
            }

            let failed = self.pending.fail_all(|| WorkerError::WorkerExited);
            if failed > 0 {
                tracing::warn!(failed, "worker response stream ended with requests pending");
            }
        })
    }
}
