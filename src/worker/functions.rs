//! User function registrations.
//!
//! Callback functions live on the controller side and are invoked when the
//! worker emits a `callback` notification. Scalar functions are installed on
//! the [`ScalarProxy`], which the engine thread calls into synchronously while
//! evaluating SQL.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use super::protocol::SqlValue;

/// Handler for a callback function. Its return value is discarded.
pub type CallbackHandler = Arc<dyn Fn(&[SqlValue]) + Send + Sync>;

/// Result of evaluating a scalar function.
pub type ScalarResult = Result<SqlValue, Box<dyn StdError + Send + Sync>>;

/// Handler for a scalar function evaluated inline by the engine.
pub type ScalarHandler = Arc<dyn Fn(&[SqlValue]) -> ScalarResult + Send + Sync>;

/// Controller-side map of callback function name -> handler.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: DashMap<String, CallbackHandler>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, handler: CallbackHandler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Clone the handler out so it can be invoked without holding the map lock.
    pub fn get(&self, name: &str) -> Option<CallbackHandler> {
        self.handlers.get(name).map(|h| Arc::clone(h.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Raised when the engine evaluates a scalar function whose handler has not
/// been installed (or was removed by teardown).
#[derive(Debug)]
pub struct FunctionNotInstalled(pub String);

impl fmt::Display for FunctionNotInstalled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scalar function '{}' is not installed", self.0)
    }
}

impl StdError for FunctionNotInstalled {}

/// Capability shared between the controller and the engine thread through
/// which scalar functions are evaluated.
#[derive(Clone, Default)]
pub struct ScalarProxy {
    handlers: Arc<DashMap<String, ScalarHandler>>,
}

impl ScalarProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, name: impl Into<String>, handler: ScalarHandler) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Evaluate the named scalar function.
    pub fn call(&self, name: &str, args: &[SqlValue]) -> ScalarResult {
        let handler = self
            .handlers
            .get(name)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| FunctionNotInstalled(name.to_string()))?;
        handler(args)
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }
}
