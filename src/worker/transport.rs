//! Transport between the controller and the worker context.

use std::path::PathBuf;
use std::sync::{mpsc as std_mpsc, Mutex};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::engine::Engine;
use super::error::{WorkerError, WorkerResult};
use super::functions::ScalarProxy;
use super::protocol::{Request, Response};

/// Name given to the engine thread.
const ENGINE_THREAD_NAME: &str = "sqlworker-engine";

/// Carries request envelopes to the worker.
///
/// Responses flow back on the receiver handed to
/// [`WorkerClient::with_transport`](super::WorkerClient::with_transport).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand a request to the worker. Payloads are moved, never copied.
    fn post(&self, request: Request) -> WorkerResult<()>;

    /// Stop the worker and release its resources.
    async fn terminate(&self);
}

/// Runs the [`Engine`] on a dedicated OS thread.
pub struct ThreadTransport {
    sender: Mutex<Option<std_mpsc::Sender<Request>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTransport {
    /// Spawn the engine thread.
    ///
    /// Returns the transport together with the stream of responses the
    /// engine emits.
    pub fn spawn(
        storage_root: PathBuf,
        scalars: ScalarProxy,
    ) -> WorkerResult<(Self, mpsc::UnboundedReceiver<Response>)> {
        let (request_tx, request_rx) = std_mpsc::channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let engine = Engine::new(storage_root, scalars, response_tx);
        let thread = thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .spawn(move || engine.run(request_rx))
            .map_err(WorkerError::SpawnFailed)?;

        let transport = Self {
            sender: Mutex::new(Some(request_tx)),
            thread: Mutex::new(Some(thread)),
        };
        Ok((transport, response_rx))
    }
}

#[async_trait]
impl Transport for ThreadTransport {
    fn post(&self, request: Request) -> WorkerResult<()> {
        let guard = self
            .sender
            .lock()
            .map_err(|_| WorkerError::TransportClosed)?;
        let sender = guard.as_ref().ok_or(WorkerError::TransportClosed)?;
        sender
            .send(request)
            .map_err(|_| WorkerError::TransportClosed)
    }

    async fn terminate(&self) {
        // Dropping the sender ends the engine loop if it is still running.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let thread = match self.thread.lock() {
            Ok(mut thread) => thread.take(),
            Err(_) => None,
        };
        let Some(thread) = thread else {
            return;
        };

        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => tracing::debug!("engine thread stopped"),
            Ok(Err(_)) => tracing::error!("engine thread panicked"),
            Err(err) => tracing::error!(error = %err, "failed to join engine thread"),
        }
    }
}
