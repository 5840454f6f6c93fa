//! # sqlworker
//!
//! Async access to a SQLite database that executes on an isolated worker
//! thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    WorkerClient                          │
//! │  (exec, batch, functions, info, import/export, destroy)  │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [request envelope + correlation key]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Transport                            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              Engine (serial, owns the store)             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [response envelope / callback]
//! ┌─────────────────────────────────────────────────────────┐
//! │     InboundRouter -> PendingRequests | callbacks         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod logging;
pub mod worker;

pub use config::Settings;
pub use worker::protocol::{
    DatabaseInfo, ErrorInfo, QueryMethod, Record, ResultSet, SqlValue, Statement,
};
pub use worker::{DatabaseSource, LifecycleState, WorkerClient, WorkerError, WorkerResult};
