//! Shutdown behavior of a client backed by a real worker.

use sqlworker::worker::protocol::Operation;
use sqlworker::{LifecycleState, QueryMethod, SqlValue, Statement, WorkerClient, WorkerError};
use tempfile::TempDir;

fn is_destroyed<T>(result: Result<T, WorkerError>) -> bool {
    matches!(result, Err(WorkerError::Destroyed))
}

#[tokio::test]
async fn test_destroyed_client_rejects_every_operation() {
    let root = TempDir::new().unwrap();
    let client = WorkerClient::open_path(root.path(), "app/main.sqlite3")
        .await
        .unwrap();
    client
        .query("CREATE TABLE groceries (name TEXT)")
        .await
        .unwrap();
    client
        .create_callback_function("logItem", |_| {})
        .await
        .unwrap();

    assert_eq!(client.state(), LifecycleState::Active);
    client.destroy().await.unwrap();
    assert_eq!(client.state(), LifecycleState::Destroyed);
    assert!(client.is_destroyed());

    assert!(is_destroyed(client.query("SELECT 1").await));
    assert!(is_destroyed(client.exec("SELECT 1", QueryMethod::Get).await));
    assert!(is_destroyed(
        client
            .batch(vec![Statement::new("SELECT ?").bind(1)])
            .await
    ));
    assert!(is_destroyed(client.get_database_info().await));
    assert!(is_destroyed(client.get_database_file().await));
    assert!(is_destroyed(
        client.overwrite_database_file(Vec::<u8>::new()).await
    ));
    assert!(is_destroyed(
        client.create_callback_function("late", |_| {}).await
    ));
    assert!(is_destroyed(
        client
            .create_scalar_function("late", |_| Ok(SqlValue::Null))
            .await
    ));
    assert!(is_destroyed(client.dispatch(Operation::GetInfo)));
    assert!(is_destroyed(client.destroy().await));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_stored_database_survives_destroy() {
    let root = TempDir::new().unwrap();

    let first = WorkerClient::open_path(root.path(), "app/main.sqlite3")
        .await
        .unwrap();
    first
        .batch(vec![
            Statement::new("CREATE TABLE groceries (name TEXT)"),
            Statement::new("INSERT INTO groceries VALUES ('pasta')"),
        ])
        .await
        .unwrap();
    first.destroy().await.unwrap();

    let second = WorkerClient::open_path(root.path(), "app/main.sqlite3")
        .await
        .unwrap();
    let rows = second.query("SELECT name FROM groceries").await.unwrap();
    assert_eq!(rows[0]["name"], SqlValue::from("pasta"));
    second.destroy().await.unwrap();
}

#[tokio::test]
async fn test_memory_database_is_discarded_on_destroy() {
    let root = TempDir::new().unwrap();

    let first = WorkerClient::open_path(root.path(), ":memory:").await.unwrap();
    first
        .query("CREATE TABLE groceries (name TEXT)")
        .await
        .unwrap();
    first.destroy().await.unwrap();

    let second = WorkerClient::open_path(root.path(), ":memory:").await.unwrap();
    let info = second.get_database_info().await.unwrap();
    assert!(info.tables.is_empty());
}
