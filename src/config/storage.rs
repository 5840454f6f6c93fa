//! Database storage paths.
//!
//! A storage path names a database file beneath the worker's storage root as
//! a sequence of directory segments followed by a file name, e.g.
//! `app/data/main.sqlite3`. The special path `:memory:` selects an in-memory
//! database.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Path selecting an in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Errors raised when a storage path cannot be decomposed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoragePathError {
    #[error("database path is empty")]
    Empty,

    #[error("'{0}' does not name a file")]
    MissingFileName(String),

    #[error("'{0}' escapes the storage root")]
    ParentSegment(String),
}

/// A database file location relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    directories: Vec<String>,
    file_name: String,
}

impl StoragePath {
    pub fn parse(path: &str) -> Result<Self, StoragePathError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(StoragePathError::Empty);
        }
        if matches!(trimmed.rsplit('/').next(), Some("" | "." | "..")) {
            return Err(StoragePathError::MissingFileName(path.to_string()));
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(StoragePathError::ParentSegment(path.to_string())),
                name => segments.push(name.to_string()),
            }
        }

        let file_name = segments
            .pop()
            .ok_or_else(|| StoragePathError::MissingFileName(path.to_string()))?;
        Ok(Self {
            directories: segments,
            file_name,
        })
    }

    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Join this path onto `root`.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.directories);
        path.push(&self.file_name);
        path
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for directory in &self.directories {
            write!(f, "{directory}/")?;
        }
        f.write_str(&self.file_name)
    }
}

/// Where the worker keeps the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    Stored(StoragePath),
}

impl DatabaseLocation {
    pub fn parse(path: &str) -> Result<Self, StoragePathError> {
        if path.trim() == MEMORY_PATH {
            return Ok(Self::Memory);
        }
        StoragePath::parse(path).map(Self::Stored)
    }

    /// File backing this location, or `None` for an in-memory database.
    pub fn resolve(&self, root: &Path) -> Option<PathBuf> {
        match self {
            Self::Memory => None,
            Self::Stored(path) => Some(path.resolve(root)),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl fmt::Display for DatabaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str(MEMORY_PATH),
            Self::Stored(path) => path.fmt(f),
        }
    }
}
