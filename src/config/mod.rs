//! Configuration module for sqlworker.
//!
//! Handles the settings file, environment variables, and storage paths.

mod settings;
mod storage;

pub use settings::{expand_env_vars, DatabaseSettings, LoggingSettings, Settings, SettingsError};
pub use storage::{DatabaseLocation, StoragePath, StoragePathError, MEMORY_PATH};
