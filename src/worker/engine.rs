//! The worker context.
//!
//! [`Engine`] owns the SQLite connection and executes requests strictly in the
//! order they arrive, emitting one response per keyed request. It runs on the
//! thread started by [`ThreadTransport`](super::ThreadTransport).

use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;

use rusqlite::backup::Progress;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, DatabaseName};
use tempfile::NamedTempFile;
use tokio::sync::mpsc::UnboundedSender;

use super::functions::ScalarProxy;
use super::protocol::{
    ConfigKey, DatabaseInfo, ErrorInfo, FunctionType, Operation, QueryKey, QueryMethod, Request,
    Response, ResultSet, SqlValue, Statement, StorageType,
};
use crate::config::{DatabaseLocation, StoragePathError};

/// Errors raised while executing a request inside the worker.
#[derive(Debug, thiserror::Error)]
enum EngineError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no database is open")]
    NoDatabase,

    #[error("invalid database path: {0}")]
    InvalidPath(#[from] StoragePathError),
}

type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Convert into the error value sent back to the controller.
    fn into_error_info(self) -> ErrorInfo {
        let code = match &self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => format!("{:?}", err.code),
            Self::Sqlite(_) => "SqliteError".to_string(),
            Self::Io(_) => "IoError".to_string(),
            Self::NoDatabase => "NoDatabase".to_string(),
            Self::InvalidPath(_) => "InvalidPath".to_string(),
        };
        ErrorInfo::new(code, self.to_string())
    }
}

/// Successful outcome of a request, before it is addressed to a key.
enum Reply {
    Success,
    Data(Vec<ResultSet>),
    Info(DatabaseInfo),
    Buffer(Vec<u8>),
}

impl Reply {
    fn into_response(self, query_key: QueryKey) -> Response {
        match self {
            Self::Success => Response::Success { query_key },
            Self::Data(data) => Response::Data { query_key, data },
            Self::Info(info) => Response::Info { query_key, info },
            Self::Buffer(buffer) => Response::Buffer { query_key, buffer },
        }
    }
}

struct OpenDatabase {
    conn: Connection,
    location: DatabaseLocation,
}

/// Serial executor over one SQLite connection.
pub struct Engine {
    storage_root: PathBuf,
    scalars: ScalarProxy,
    outbound: UnboundedSender<Response>,
    database: Option<OpenDatabase>,
}

impl Engine {
    pub fn new(
        storage_root: PathBuf,
        scalars: ScalarProxy,
        outbound: UnboundedSender<Response>,
    ) -> Self {
        Self {
            storage_root,
            scalars,
            outbound,
            database: None,
        }
    }

    /// Process requests until `destroy` is handled or the controller hangs up.
    pub fn run(mut self, inbound: Receiver<Request>) {
        tracing::debug!(storage_root = %self.storage_root.display(), "engine started");

        while let Ok(Request {
            query_key,
            operation,
        }) = inbound.recv()
        {
            let kind = operation.kind();
            let destroy = matches!(operation, Operation::Destroy);
            tracing::debug!(kind, query_key = ?query_key, "executing request");

            let response = match (self.execute(operation), query_key) {
                (Ok(reply), Some(key)) => Some(reply.into_response(key)),
                (Ok(_), None) => None,
                (Err(err), query_key) => {
                    tracing::warn!(kind, error = %err, "request failed");
                    Some(Response::Error {
                        query_key,
                        error: err.into_error_info(),
                    })
                }
            };

            if let Some(response) = response {
                if self.outbound.send(response).is_err() {
                    tracing::debug!("controller stopped listening");
                    break;
                }
            }
            if destroy {
                break;
            }
        }

        tracing::debug!("engine stopped");
    }

    fn execute(&mut self, operation: Operation) -> EngineResult<Reply> {
        match operation {
            Operation::Config {
                key: ConfigKey::DatabasePath,
                value,
            } => {
                self.open(&value)?;
                Ok(Reply::Success)
            }
            Operation::Query {
                sql,
                params,
                method,
            } => {
                let result = run_statement(self.connection()?, &sql, &params, method)?;
                Ok(Reply::Data(vec![result]))
            }
            Operation::Batch { statements } => self.batch(&statements).map(Reply::Data),
            Operation::Function {
                function_name,
                function_type,
            } => {
                self.create_function(&function_name, function_type)?;
                Ok(Reply::Success)
            }
            Operation::Import { database } => {
                self.import(&database)?;
                Ok(Reply::Success)
            }
            Operation::Export => self.export().map(Reply::Buffer),
            Operation::GetInfo => self.info().map(Reply::Info),
            Operation::Destroy => {
                self.close()?;
                Ok(Reply::Success)
            }
        }
    }

    fn connection(&self) -> EngineResult<&Connection> {
        self.database
            .as_ref()
            .map(|db| &db.conn)
            .ok_or(EngineError::NoDatabase)
    }

    fn connection_mut(&mut self) -> EngineResult<&mut Connection> {
        self.database
            .as_mut()
            .map(|db| &mut db.conn)
            .ok_or(EngineError::NoDatabase)
    }

    /// Open the database named by `path`, replacing any open connection.
    fn open(&mut self, path: &str) -> EngineResult<()> {
        let location = DatabaseLocation::parse(path)?;
        let conn = match location.resolve(&self.storage_root) {
            Some(file) => {
                if let Some(parent) = file.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(&file)?
            }
            None => Connection::open_in_memory()?,
        };

        self.close()?;
        tracing::info!(database = %location, "database opened");
        self.database = Some(OpenDatabase { conn, location });
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        if let Some(db) = self.database.take() {
            db.conn.close().map_err(|(_, err)| err)?;
            tracing::debug!(database = %db.location, "database closed");
        }
        Ok(())
    }

    /// Run every statement inside one transaction; the first failure rolls back.
    fn batch(&mut self, statements: &[Statement]) -> EngineResult<Vec<ResultSet>> {
        let tx = self.connection_mut()?.transaction()?;
        let results = statements
            .iter()
            .map(|s| run_statement(&tx, &s.sql, &s.params, QueryMethod::All))
            .collect::<EngineResult<Vec<_>>>()?;
        tx.commit()?;
        Ok(results)
    }

    fn create_function(&self, name: &str, function_type: FunctionType) -> EngineResult<()> {
        let conn = self.connection()?;
        let flags = FunctionFlags::SQLITE_UTF8;

        match function_type {
            FunctionType::Callback => {
                let bridge = AssertUnwindSafe(CallbackBridge {
                    name: name.to_string(),
                    outbound: self.outbound.clone(),
                });
                conn.create_scalar_function(name, -1, flags, move |ctx| bridge.emit(ctx))?;
            }
            FunctionType::Scalar => {
                let bridge = AssertUnwindSafe(ScalarBridge {
                    name: name.to_string(),
                    proxy: self.scalars.clone(),
                });
                conn.create_scalar_function(name, -1, flags, move |ctx| bridge.call(ctx))?;
            }
        }
        Ok(())
    }

    /// Replace the main database with the given image.
    fn import(&mut self, image: &[u8]) -> EngineResult<()> {
        let mut staged = NamedTempFile::new()?;
        staged.write_all(image)?;
        staged.flush()?;

        self.connection_mut()?
            .restore(DatabaseName::Main, staged.path(), None::<fn(Progress)>)?;
        Ok(())
    }

    fn export(&self) -> EngineResult<Vec<u8>> {
        let staged = NamedTempFile::new()?;
        self.connection()?
            .backup(DatabaseName::Main, staged.path(), None)?;
        Ok(std::fs::read(staged.path())?)
    }

    fn info(&self) -> EngineResult<DatabaseInfo> {
        let db = self.database.as_ref().ok_or(EngineError::NoDatabase)?;

        let size: i64 = db.conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = db.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let persisted = !db.location.is_memory();
        Ok(DatabaseInfo {
            database_path: Some(db.location.to_string()),
            database_size_bytes: u64::try_from(size).ok(),
            storage_type: Some(if persisted {
                StorageType::File
            } else {
                StorageType::Memory
            }),
            persisted,
            tables,
        })
    }
}

/// Execute one statement, shaping its rows according to `method`.
fn run_statement(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    method: QueryMethod,
) -> EngineResult<ResultSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut result = ResultSet {
        columns,
        rows: Vec::new(),
    };
    let mut cursor = stmt.query(params_from_iter(params))?;
    // `All` and `Values` share the positional shape.
    while let Some(row) = cursor.next()? {
        if method == QueryMethod::Run {
            continue;
        }
        let values = (0..width)
            .map(|i| row.get_ref(i).map(SqlValue::from))
            .collect::<Result<Vec<_>, _>>()?;
        result.rows.push(values);
        if method == QueryMethod::Get {
            break;
        }
    }

    Ok(result)
}

fn function_args(ctx: &Context<'_>) -> Vec<SqlValue> {
    (0..ctx.len()).map(|i| SqlValue::from(ctx.get_raw(i))).collect()
}

/// Engine-side half of a callback function: forwards each invocation to the
/// controller and evaluates to NULL.
struct CallbackBridge {
    name: String,
    outbound: UnboundedSender<Response>,
}

impl CallbackBridge {
    fn emit(&self, ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
        let notification = Response::Callback {
            name: self.name.clone(),
            args: function_args(ctx),
        };
        if self.outbound.send(notification).is_err() {
            tracing::debug!(function = %self.name, "callback dropped, controller gone");
        }
        Ok(SqlValue::Null)
    }
}

/// Engine-side half of a scalar function: evaluates through the proxy.
struct ScalarBridge {
    name: String,
    proxy: ScalarProxy,
}

impl ScalarBridge {
    fn call(&self, ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
        self.proxy
            .call(&self.name, &function_args(ctx))
            .map_err(rusqlite::Error::UserFunctionError)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}
