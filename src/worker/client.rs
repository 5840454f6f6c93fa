//! Async client for the database worker.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use super::error::{WorkerError, WorkerResult};
use super::functions::{CallbackRegistry, ScalarProxy, ScalarResult};
use super::key::next_query_key;
use super::lifecycle::{Lifecycle, LifecycleState};
use super::pending::{PendingRequests, ReplyReceiver};
use super::protocol::{
    ConfigKey, DatabaseInfo, ErrorInfo, FunctionType, Operation, QueryKey, QueryMethod, Record,
    Request, Response, ResultSet, SqlValue, Statement,
};
use super::router::InboundRouter;
use super::transport::{ThreadTransport, Transport};
use crate::config::{DatabaseLocation, Settings};

/// Awaitable reply to a dispatched request.
///
/// Dropping it stops waiting but does not withdraw the request; the worker
/// still executes it and the pending entry is freed when the reply arrives.
pub struct PendingReply {
    query_key: QueryKey,
    receiver: ReplyReceiver,
}

impl PendingReply {
    pub fn query_key(&self) -> &str {
        &self.query_key
    }
}

impl Future for PendingReply {
    type Output = WorkerResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|outcome| outcome.map_err(WorkerError::from).and_then(|reply| reply))
    }
}

/// A database image for [`WorkerClient::overwrite_database_file`].
#[derive(Debug, Clone)]
pub enum DatabaseSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl DatabaseSource {
    /// Normalize to the raw bytes sent to the worker.
    pub async fn into_bytes(self) -> WorkerResult<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::File(path) => tokio::fs::read(&path)
                .await
                .map_err(WorkerError::ReadFailed),
        }
    }
}

impl From<Vec<u8>> for DatabaseSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for DatabaseSource {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<PathBuf> for DatabaseSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for DatabaseSource {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

/// Async client for the database worker.
///
/// Every operation is sent to the worker as a request envelope stamped with a
/// unique correlation key, so many requests may be in flight at once and
/// their replies may arrive in any order.
///
/// # Example
///
/// ```ignore
/// use sqlworker::{Statement, WorkerClient};
///
/// let client = WorkerClient::open_path("/var/lib/app", "app/main.sqlite3").await?;
/// client.query("CREATE TABLE groceries (name TEXT)").await?;
/// let rows = client
///     .query(Statement::new("INSERT INTO groceries VALUES (?) RETURNING name").bind("pasta"))
///     .await?;
/// client.destroy().await?;
/// ```
pub struct WorkerClient {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingRequests>,
    callbacks: Arc<CallbackRegistry>,
    scalars: ScalarProxy,
    router: Arc<InboundRouter>,
    lifecycle: Lifecycle,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// Subscribed before the first request is posted, so errors raised while
    /// opening the database are still buffered for the first subscriber.
    first_unhandled: StdMutex<Option<broadcast::Receiver<ErrorInfo>>>,
}

impl WorkerClient {
    /// Start a worker for the database described by `settings`.
    pub async fn open(settings: &Settings) -> WorkerResult<Self> {
        let root = settings.database.resolved_storage_root()?;
        let path = settings.database.resolved_path()?;
        Self::open_path(root, &path).await
    }

    /// Start a worker storing databases under `storage_root` and open
    /// `database_path` (a storage path or `:memory:`).
    ///
    /// # Errors
    ///
    /// Fails locally, before the worker is started, if `database_path` cannot
    /// be decomposed into directory segments and a file name.
    pub async fn open_path(
        storage_root: impl Into<PathBuf>,
        database_path: &str,
    ) -> WorkerResult<Self> {
        let location = DatabaseLocation::parse(database_path)?;

        let scalars = ScalarProxy::new();
        let (transport, inbound) = ThreadTransport::spawn(storage_root.into(), scalars.clone())?;
        let client = Self::with_transport(Arc::new(transport), inbound, scalars);

        client.transport.post(Request::notify(Operation::Config {
            key: ConfigKey::DatabasePath,
            value: location.to_string(),
        }))?;
        tracing::debug!(database = %location, "worker client opened");
        Ok(client)
    }

    /// Build a client over an existing transport.
    ///
    /// `inbound` is the stream of responses the worker emits; `scalars` is the
    /// proxy the worker evaluates scalar functions through.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<Response>,
        scalars: ScalarProxy,
    ) -> Self {
        let pending = Arc::new(PendingRequests::new());
        let callbacks = Arc::new(CallbackRegistry::new());
        let router = Arc::new(InboundRouter::new(
            Arc::clone(&pending),
            Arc::clone(&callbacks),
        ));
        let first_unhandled = router.subscribe_unhandled();
        let reader_task = Arc::clone(&router).spawn_reader_task(inbound);

        Self {
            transport,
            pending,
            callbacks,
            scalars,
            router,
            lifecycle: Lifecycle::new(),
            reader_task: Mutex::new(Some(reader_task)),
            first_unhandled: StdMutex::new(Some(first_unhandled)),
        }
    }

    /// Send an operation to the worker.
    ///
    /// Submission happens before this returns; the returned [`PendingReply`]
    /// resolves when the correlated response arrives.
    pub fn dispatch(&self, operation: Operation) -> WorkerResult<PendingReply> {
        self.lifecycle.ensure_active()?;

        let query_key = next_query_key();
        let receiver = self.pending.register(query_key.clone())?;

        let kind = operation.kind();
        if let Err(err) = self
            .transport
            .post(Request::keyed(query_key.clone(), operation))
        {
            self.pending.discard(&query_key);
            return Err(err);
        }
        tracing::debug!(query_key = %query_key, kind, "dispatched request");

        Ok(PendingReply {
            query_key,
            receiver,
        })
    }

    /// Execute one statement and return its result set.
    ///
    /// Replies other than `data` (e.g. a bare acknowledgement) yield an empty
    /// result set.
    pub async fn exec(
        &self,
        statement: impl Into<Statement>,
        method: QueryMethod,
    ) -> WorkerResult<ResultSet> {
        let response = self.dispatch(Operation::query(statement, method))?.await?;

        Ok(match response {
            Response::Data { data, .. } => data.into_iter().next().unwrap_or_default(),
            _ => ResultSet::default(),
        })
    }

    /// Execute one statement and shape its rows into records.
    pub async fn query(&self, statement: impl Into<Statement>) -> WorkerResult<Vec<Record>> {
        Ok(self.exec(statement, QueryMethod::All).await?.records())
    }

    /// Execute statements back-to-back in one worker transaction.
    ///
    /// The result always has one entry per statement; positions the worker
    /// did not report are empty result sets.
    pub async fn batch(&self, statements: Vec<Statement>) -> WorkerResult<Vec<ResultSet>> {
        let expected = statements.len();
        let response = self.dispatch(Operation::Batch { statements })?.await?;

        let mut results = vec![ResultSet::default(); expected];
        if let Response::Data { data, .. } = response {
            for (slot, result) in results.iter_mut().zip(data) {
                *slot = result;
            }
        }
        Ok(results)
    }

    /// Register a function whose invocations inside SQL are forwarded to
    /// `handler`. The handler only becomes reachable once the worker
    /// acknowledges the registration.
    ///
    /// Fails with [`WorkerError::Destroyed`] if the acknowledgement arrives
    /// after [`WorkerClient::destroy`] has started tearing down.
    pub async fn create_callback_function<F>(
        &self,
        name: impl Into<String>,
        handler: F,
    ) -> WorkerResult<()>
    where
        F: Fn(&[SqlValue]) + Send + Sync + 'static,
    {
        let name = name.into();
        self.register_function(&name, FunctionType::Callback).await?;
        self.lifecycle
            .while_open(|| self.callbacks.insert(name, Arc::new(handler)))
    }

    /// Register a function the engine evaluates inline, using the value
    /// `handler` returns.
    pub async fn create_scalar_function<F>(
        &self,
        name: impl Into<String>,
        handler: F,
    ) -> WorkerResult<()>
    where
        F: Fn(&[SqlValue]) -> ScalarResult + Send + Sync + 'static,
    {
        let name = name.into();
        self.register_function(&name, FunctionType::Scalar).await?;
        self.lifecycle
            .while_open(|| self.scalars.install(name, Arc::new(handler)))
    }

    async fn register_function(&self, name: &str, function_type: FunctionType) -> WorkerResult<()> {
        self.dispatch(Operation::Function {
            function_name: name.to_string(),
            function_type,
        })?
        .await?;
        tracing::debug!(function = name, ?function_type, "function registered");
        Ok(())
    }

    /// Retrieve database metadata.
    pub async fn get_database_info(&self) -> WorkerResult<DatabaseInfo> {
        match self.dispatch(Operation::GetInfo)?.await? {
            Response::Info { info, .. } => Ok(info),
            other => Err(WorkerError::UnexpectedResponse {
                expected: "info",
                received: other.kind(),
            }),
        }
    }

    /// Export the current database image.
    pub async fn get_database_file(&self) -> WorkerResult<Vec<u8>> {
        match self.dispatch(Operation::Export)?.await? {
            Response::Buffer { buffer, .. } => Ok(buffer),
            other => Err(WorkerError::UnexpectedResponse {
                expected: "buffer",
                received: other.kind(),
            }),
        }
    }

    /// Replace the database contents with the given image.
    pub async fn overwrite_database_file(
        &self,
        source: impl Into<DatabaseSource>,
    ) -> WorkerResult<()> {
        self.lifecycle.ensure_active()?;
        let database = source.into().into_bytes().await?;
        let size = database.len();
        self.dispatch(Operation::Import { database })?.await?;
        tracing::info!(size, "database image imported");
        Ok(())
    }

    /// Shut the worker down. Every later operation fails with
    /// [`WorkerError::Destroyed`].
    pub async fn destroy(&self) -> WorkerResult<()> {
        self.dispatch(Operation::Destroy)?.await?;

        self.lifecycle.begin_teardown();
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }
        let abandoned = self.pending.clear();
        self.callbacks.clear();
        self.scalars.clear();
        self.transport.terminate().await;
        self.lifecycle.mark_destroyed();

        tracing::info!(abandoned, "worker client destroyed");
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == LifecycleState::Destroyed
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Subscribe to worker errors that matched no pending request.
    ///
    /// The first call returns a receiver that has been listening since the
    /// client was built, so it also yields failures of the initial database
    /// open. Later calls only see errors raised after they subscribe.
    pub fn subscribe_unhandled(&self) -> broadcast::Receiver<ErrorInfo> {
        self.first_unhandled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| self.router.subscribe_unhandled())
    }
}
