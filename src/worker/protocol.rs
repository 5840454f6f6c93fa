//! Protocol types for worker communication.
//!
//! Every message crossing the controller/worker boundary is one of these
//! envelopes. Requests that expect a reply carry a correlation key
//! (`query_key`); the reply echoes it back. `callback` responses are the only
//! uncorrelated inbound messages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Correlation key stamped on every request that expects a reply.
pub type QueryKey = String;

/// A row shaped into column name -> value.
pub type Record = HashMap<String, SqlValue>;

// ============================================================================
// Values and Statements
// ============================================================================

/// A single SQL value as exchanged with the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns the text content if this is a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content if this is an `Integer` value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One SQL statement with its positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// Result-shape hint for a `query` request.
///
/// The engine returns the same positional [`ResultSet`] for `All` and
/// `Values`. They differ only on the controller side: `All` rows are usually
/// shaped with [`ResultSet::records`], `Values` rows are read as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMethod {
    /// Every row.
    #[default]
    All,
    /// The first row only.
    Get,
    /// Execute and discard rows.
    Run,
    /// Every row, left positional.
    Values,
}

/// Rows produced by one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Shape each row into a record keyed by column name.
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

// ============================================================================
// Request Envelope
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Correlation key; absent on fire-and-forget `config` requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_key: Option<QueryKey>,
    #[serde(flatten)]
    pub operation: Operation,
}

impl Request {
    /// A request that expects a correlated reply.
    pub fn keyed(query_key: QueryKey, operation: Operation) -> Self {
        Self {
            query_key: Some(query_key),
            operation,
        }
    }

    /// A fire-and-forget notification.
    pub fn notify(operation: Operation) -> Self {
        Self {
            query_key: None,
            operation,
        }
    }
}

/// Connection-scoped option names for `config` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKey {
    /// Storage path of the database, or `:memory:`.
    DatabasePath,
}

/// Kind of user function being registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionType {
    /// Invoked on the controller side; return value discarded.
    Callback,
    /// Evaluated inline by the engine through the scalar proxy.
    Scalar,
}

/// The operation a request asks the worker to perform.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Config {
        key: ConfigKey,
        value: String,
    },
    Query {
        sql: String,
        params: Vec<SqlValue>,
        method: QueryMethod,
    },
    Batch {
        statements: Vec<Statement>,
    },
    Function {
        function_name: String,
        function_type: FunctionType,
    },
    Import {
        database: Vec<u8>,
    },
    Export,
    #[serde(rename = "getinfo")]
    GetInfo,
    Destroy,
}

impl Operation {
    /// Build a `query` operation from a statement.
    pub fn query(statement: impl Into<Statement>, method: QueryMethod) -> Self {
        let Statement { sql, params } = statement.into();
        Self::Query {
            sql,
            params,
            method,
        }
    }

    /// Wire name of the operation, used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Query { .. } => "query",
            Self::Batch { .. } => "batch",
            Self::Function { .. } => "function",
            Self::Import { .. } => "import",
            Self::Export => "export",
            Self::GetInfo => "getinfo",
            Self::Destroy => "destroy",
        }
    }

    /// Whether the worker answers this operation with a correlated reply.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::Config { .. })
    }
}

// ============================================================================
// Response Envelope
// ============================================================================

/// Error value reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// How the worker stores the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    File,
}

/// Database metadata returned for `getinfo`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseInfo {
    pub database_path: Option<String>,
    pub database_size_bytes: Option<u64>,
    pub storage_type: Option<StorageType>,
    pub persisted: bool,
    pub tables: Vec<String>,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Success {
        query_key: QueryKey,
    },
    Data {
        query_key: QueryKey,
        data: Vec<ResultSet>,
    },
    Error {
        #[serde(default)]
        query_key: Option<QueryKey>,
        error: ErrorInfo,
    },
    Info {
        query_key: QueryKey,
        info: DatabaseInfo,
    },
    Buffer {
        query_key: QueryKey,
        buffer: Vec<u8>,
    },
    /// Uncorrelated invocation of a registered callback function.
    Callback {
        name: String,
        args: Vec<SqlValue>,
    },
}

impl Response {
    /// The correlation key this response answers, if any.
    pub fn query_key(&self) -> Option<&str> {
        match self {
            Self::Success { query_key }
            | Self::Data { query_key, .. }
            | Self::Info { query_key, .. }
            | Self::Buffer { query_key, .. } => Some(query_key),
            Self::Error { query_key, .. } => query_key.as_deref(),
            Self::Callback { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Data { .. } => "data",
            Self::Error { .. } => "error",
            Self::Info { .. } => "info",
            Self::Buffer { .. } => "buffer",
            Self::Callback { .. } => "callback",
        }
    }
}
