//! Worker communication module.
//!
//! The SQLite engine runs on its own thread (the worker context) and owns the
//! database exclusively. The controller talks to it only through message
//! envelopes, correlating each reply with its request by key.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Controller (Rust + Tokio)                      │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                    WorkerClient (Async)                   │  │
//! │  │  - Stamps each request with a correlation key             │  │
//! │  │  - Parks a oneshot per key in PendingRequests             │  │
//! │  │  - Reader task routes replies and callback notifications  │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │            Request envelopes │ Response envelopes               │
//! │                              ▼                                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Engine (dedicated thread, rusqlite)                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sqlworker::worker::{WorkerClient, protocol::*};
//!
//! let client = WorkerClient::open_path("/var/lib/app", ":memory:").await?;
//!
//! let results = client.batch(vec![
//!     Statement::new("CREATE TABLE groceries (name TEXT)"),
//!     Statement::new("INSERT INTO groceries VALUES (?)").bind("pasta"),
//! ]).await?;
//!
//! client.destroy().await?;
//! ```

mod client;
mod engine;
mod error;
pub mod functions;
mod key;
mod lifecycle;
mod pending;
pub mod protocol;
mod router;
mod transport;

pub use client::{DatabaseSource, PendingReply, WorkerClient};
pub use error::{WorkerError, WorkerResult};
pub use functions::{ScalarProxy, ScalarResult};
pub use key::next_query_key;
pub use lifecycle::LifecycleState;
pub use pending::{PendingRequests, Settlement};
pub use transport::{ThreadTransport, Transport};
