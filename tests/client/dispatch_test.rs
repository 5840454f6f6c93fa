//! Correlation and dispatch behavior, driven by a scripted transport that
//! lets each test decide which replies the "worker" sends and in what order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlworker::worker::protocol::{
    DatabaseInfo, ErrorInfo, FunctionType, Operation, QueryMethod, Request, Response, ResultSet,
    SqlValue, Statement,
};
use sqlworker::worker::{
    ScalarProxy, ScalarResult, Transport, WorkerClient, WorkerError, WorkerResult,
};
use tokio::sync::mpsc;

struct ScriptedTransport {
    requests: mpsc::UnboundedSender<Request>,
    terminated: AtomicBool,
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn post(&self, request: Request) -> WorkerResult<()> {
        self.requests
            .send(request)
            .map_err(|_| WorkerError::TransportClosed)
    }

    async fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// The test's side of the scripted transport.
struct ScriptedWorker {
    requests: mpsc::UnboundedReceiver<Request>,
    replies: mpsc::UnboundedSender<Response>,
}

impl ScriptedWorker {
    /// Next request the client posted, with its correlation key.
    async fn next_request(&mut self) -> (String, Operation) {
        let request = self.requests.recv().await.expect("client posted a request");
        (request.query_key.expect("request is keyed"), request.operation)
    }

    fn reply(&self, response: Response) {
        self.replies.send(response).unwrap();
    }

    /// Acknowledge the next request with a bare `success`.
    async fn ack_next(&mut self) {
        let (key, _) = self.next_request().await;
        self.reply(Response::Success { query_key: key });
    }

    fn posted_count(&mut self) -> usize {
        let mut count = 0;
        while self.requests.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

fn scripted_client() -> (WorkerClient, Arc<ScriptedTransport>, ScriptedWorker) {
    scripted_client_with(ScalarProxy::new())
}

fn scripted_client_with(
    scalars: ScalarProxy,
) -> (WorkerClient, Arc<ScriptedTransport>, ScriptedWorker) {
    let (request_tx, requests) = mpsc::unbounded_channel();
    let (replies, inbound) = mpsc::unbounded_channel();
    let transport = Arc::new(ScriptedTransport {
        requests: request_tx,
        terminated: AtomicBool::new(false),
    });
    let client = WorkerClient::with_transport(transport.clone(), inbound, scalars);
    (client, transport, ScriptedWorker { requests, replies })
}

fn data(query_key: &str, results: Vec<ResultSet>) -> Response {
    Response::Data {
        query_key: query_key.to_string(),
        data: results,
    }
}

fn single(column: &str, value: SqlValue) -> ResultSet {
    ResultSet {
        columns: vec![column.to_string()],
        rows: vec![vec![value]],
    }
}

#[tokio::test]
async fn test_out_of_order_replies_reach_their_own_callers() {
    let (client, _transport, mut worker) = scripted_client();

    let mut replies = Vec::new();
    let mut keys = Vec::new();
    for n in 0..5i64 {
        let reply = client
            .dispatch(Operation::query(
                Statement::new("SELECT ?").bind(n),
                QueryMethod::All,
            ))
            .unwrap();
        let (key, operation) = worker.next_request().await;
        assert_eq!(reply.query_key(), key);
        match operation {
            Operation::Query { params, .. } => assert_eq!(params, vec![SqlValue::Integer(n)]),
            other => panic!("unexpected operation: {other:?}"),
        }
        replies.push(reply);
        keys.push(key);
    }
    assert_eq!(client.pending_requests(), 5);

    // Answer in reverse submission order, echoing each request's parameter.
    for (n, key) in keys.iter().enumerate().rev() {
        worker.reply(data(key, vec![single("n", SqlValue::Integer(n as i64))]));
    }

    let results = futures::future::join_all(replies).await;
    for (n, result) in results.into_iter().enumerate() {
        match result.unwrap() {
            Response::Data { data, .. } => {
                assert_eq!(data[0].rows[0][0], SqlValue::Integer(n as i64))
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_insert_returning_resolves_to_records() {
    let (client, _transport, mut worker) = scripted_client();

    let query = client.query(
        Statement::new("INSERT INTO groceries (name) VALUES (?) RETURNING name").bind("pasta"),
    );
    let script = async {
        let (key, _) = worker.next_request().await;
        worker.reply(data(&key, vec![single("name", "pasta".into())]));
    };
    let (records, ()) = tokio::join!(query, script);

    let records = records.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], SqlValue::from("pasta"));
}

#[tokio::test]
async fn test_exec_falls_back_to_empty_result() {
    let (client, _transport, mut worker) = scripted_client();

    let exec = client.exec("DELETE FROM groceries", QueryMethod::Run);
    let (result, ()) = tokio::join!(exec, worker.ack_next());

    assert_eq!(result.unwrap(), ResultSet::default());
}

#[tokio::test]
async fn test_batch_result_is_padded_to_statement_count() {
    let (client, _transport, mut worker) = scripted_client();

    let statements = vec![
        Statement::new("INSERT INTO groceries VALUES ('pasta') RETURNING name"),
        Statement::new("INSERT INTO groceries VALUES ('rice') RETURNING name"),
        Statement::new("SELECT count(*) AS n FROM groceries"),
    ];
    let batch = client.batch(statements);
    let script = async {
        let (key, operation) = worker.next_request().await;
        match operation {
            Operation::Batch { statements } => assert_eq!(statements.len(), 3),
            other => panic!("unexpected operation: {other:?}"),
        }
        worker.reply(data(&key, vec![single("name", "pasta".into())]));
    };
    let (results, ()) = tokio::join!(batch, script);

    let results = results.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], single("name", "pasta".into()));
    assert_eq!(results[1], ResultSet::default());
    assert_eq!(results[2], ResultSet::default());
}

#[tokio::test]
async fn test_execution_error_is_delivered_verbatim() {
    let (client, _transport, mut worker) = scripted_client();

    let query = client.query("INSERT INTO groceries VALUES (NULL)");
    let script = async {
        let (key, _) = worker.next_request().await;
        worker.reply(Response::Error {
            query_key: Some(key),
            error: ErrorInfo::new(
                "ConstraintViolation",
                "NOT NULL constraint failed: groceries.name",
            ),
        });
    };
    let (result, ()) = tokio::join!(query, script);

    match result.unwrap_err() {
        WorkerError::Execution { code, message } => {
            assert_eq!(code, "ConstraintViolation");
            assert_eq!(message, "NOT NULL constraint failed: groceries.name");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_get_database_info_returns_payload() {
    let (client, _transport, mut worker) = scripted_client();
    let expected = DatabaseInfo {
        tables: vec!["groceries".to_string()],
        ..DatabaseInfo::default()
    };

    let info = client.get_database_info();
    let script = async {
        let (key, operation) = worker.next_request().await;
        assert_eq!(operation.kind(), "getinfo");
        worker.reply(Response::Info {
            query_key: key,
            info: expected.clone(),
        });
    };
    let (info, ()) = tokio::join!(info, script);

    assert_eq!(info.unwrap(), expected);
}

#[tokio::test]
async fn test_get_database_info_rejects_wrong_reply_kind() {
    let (client, _transport, mut worker) = scripted_client();

    let info = client.get_database_info();
    let script = async {
        let (key, _) = worker.next_request().await;
        worker.reply(data(&key, vec![]));
    };
    let (info, ()) = tokio::join!(info, script);

    assert!(matches!(
        info,
        Err(WorkerError::UnexpectedResponse {
            expected: "info",
            received: "data"
        })
    ));
}

#[tokio::test]
async fn test_callback_handler_installed_only_after_ack() {
    let (client, _transport, mut worker) = scripted_client();
    let seen: Arc<Mutex<Vec<Vec<SqlValue>>>> = Arc::default();
    let sink = Arc::clone(&seen);

    let register = client.create_callback_function("logInsert", move |args| {
        sink.lock().unwrap().push(args.to_vec());
    });
    let script = async {
        let (key, operation) = worker.next_request().await;
        match operation {
            Operation::Function {
                function_name,
                function_type,
            } => {
                assert_eq!(function_name, "logInsert");
                assert_eq!(function_type, FunctionType::Callback);
            }
            other => panic!("unexpected operation: {other:?}"),
        }
        // A notification racing ahead of the acknowledgement is dropped.
        worker.reply(Response::Callback {
            name: "logInsert".to_string(),
            args: vec!["early".into()],
        });
        worker.reply(Response::Success { query_key: key });
    };
    let (registered, ()) = tokio::join!(register, script);
    registered.unwrap();

    worker.reply(Response::Callback {
        name: "logInsert".to_string(),
        args: vec!["pasta".into()],
    });
    // A correlated round trip guarantees the router has processed the callback.
    let round_trip = client.exec("SELECT 1", QueryMethod::All);
    let (round_trip, ()) = tokio::join!(round_trip, worker.ack_next());
    round_trip.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![vec![SqlValue::from("pasta")]]);
}

#[tokio::test]
async fn test_rejected_registration_retains_no_handler() {
    let (client, _transport, mut worker) = scripted_client();
    let seen: Arc<Mutex<usize>> = Arc::default();
    let sink = Arc::clone(&seen);

    let register = client.create_callback_function("logInsert", move |_| {
        *sink.lock().unwrap() += 1;
    });
    let script = async {
        let (key, _) = worker.next_request().await;
        worker.reply(Response::Error {
            query_key: Some(key),
            error: ErrorInfo::new("NoDatabase", "no database is open"),
        });
    };
    let (registered, ()) = tokio::join!(register, script);
    assert!(registered.unwrap_err().is_execution());

    worker.reply(Response::Callback {
        name: "logInsert".to_string(),
        args: vec![],
    });
    let round_trip = client.exec("SELECT 1", QueryMethod::All);
    let (round_trip, ()) = tokio::join!(round_trip, worker.ack_next());
    round_trip.unwrap();

    assert_eq!(*seen.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_stray_error_is_surfaced_as_unhandled() {
    let (client, _transport, worker) = scripted_client();
    let mut unhandled = client.subscribe_unhandled();
    let error = ErrorInfo::new("CantOpen", "unable to open database file");

    worker.reply(Response::Error {
        query_key: Some("no-such-request".to_string()),
        error: error.clone(),
    });

    assert_eq!(unhandled.recv().await.unwrap(), error);
}

#[tokio::test]
async fn test_stray_error_before_subscribing_is_kept_for_first_subscriber() {
    let (client, _transport, mut worker) = scripted_client();
    let error = ErrorInfo::new("IoError", "Not a directory (os error 20)");

    worker.reply(Response::Error {
        query_key: None,
        error: error.clone(),
    });
    // Round trip so the router has handled the error before anyone subscribes.
    let round_trip = client.exec("SELECT 1", QueryMethod::All);
    let (round_trip, ()) = tokio::join!(round_trip, worker.ack_next());
    round_trip.unwrap();

    let mut first = client.subscribe_unhandled();
    assert_eq!(first.recv().await.unwrap(), error);

    let mut later = client.subscribe_unhandled();
    assert!(matches!(
        later.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn test_registration_acked_during_destroy_installs_nothing() {
    let scalars = ScalarProxy::new();
    let (client, _transport, mut worker) = scripted_client_with(scalars.clone());

    let register =
        client.create_scalar_function("late", |_| -> ScalarResult { Ok(SqlValue::Null) });
    tokio::pin!(register);
    assert!(futures::poll!(register.as_mut()).is_pending());

    // The registration is acknowledged, but its caller only resumes after
    // destroy has finished tearing down.
    let (key, operation) = worker.next_request().await;
    assert_eq!(operation.kind(), "function");
    worker.reply(Response::Success { query_key: key });

    let destroy = client.destroy();
    let script = async {
        let (key, operation) = worker.next_request().await;
        assert_eq!(operation.kind(), "destroy");
        worker.reply(Response::Success { query_key: key });
    };
    let (destroyed, ()) = tokio::join!(destroy, script);
    destroyed.unwrap();

    assert!(matches!(register.await, Err(WorkerError::Destroyed)));
    assert!(!scalars.is_installed("late"));
    assert!(client.is_destroyed());
}

#[tokio::test]
async fn test_worker_hangup_fails_pending_requests() {
    let (client, _transport, worker) = scripted_client();
    let ScriptedWorker {
        requests: _requests,
        replies,
    } = worker;

    let reply = client.dispatch(Operation::GetInfo).unwrap();
    drop(replies);

    assert!(matches!(reply.await, Err(WorkerError::WorkerExited)));
}

#[tokio::test]
async fn test_destroy_tears_down_and_rejects_later_calls() {
    let (client, transport, mut worker) = scripted_client();

    let destroy = client.destroy();
    let script = async {
        let (key, operation) = worker.next_request().await;
        assert_eq!(operation.kind(), "destroy");
        worker.reply(Response::Success { query_key: key });
    };
    let (destroyed, ()) = tokio::join!(destroy, script);
    destroyed.unwrap();

    assert!(client.is_destroyed());
    assert!(transport.terminated.load(Ordering::SeqCst));

    assert!(matches!(
        client.dispatch(Operation::query("SELECT 1", QueryMethod::All)),
        Err(WorkerError::Destroyed)
    ));
    assert!(matches!(
        client.query("SELECT 1").await,
        Err(WorkerError::Destroyed)
    ));
    assert!(matches!(
        client.overwrite_database_file(vec![0u8; 16]).await,
        Err(WorkerError::Destroyed)
    ));
    assert_eq!(worker.posted_count(), 0);
}

#[tokio::test]
async fn test_failed_destroy_leaves_client_active() {
    let (client, transport, mut worker) = scripted_client();

    let destroy = client.destroy();
    let script = async {
        let (key, _) = worker.next_request().await;
        worker.reply(Response::Error {
            query_key: Some(key),
            error: ErrorInfo::new("Busy", "database is locked"),
        });
    };
    let (destroyed, ()) = tokio::join!(destroy, script);

    assert!(destroyed.is_err());
    assert!(!client.is_destroyed());
    assert!(!transport.terminated.load(Ordering::SeqCst));
}
