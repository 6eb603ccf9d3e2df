//! Error types for fimwatch
//!
//! This module defines the error hierarchy for the monitor:
//! - Engine-level errors raised while reconciling paths against the database
//! - Entry store errors
//! - Configuration and CLI errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include the path or value that failed
//! - Preserve error chains for debugging

use std::io;
use thiserror::Error;

/// Top-level error type for the monitoring engine
#[derive(Error, Debug)]
pub enum FimError {
    /// A path could not be mapped to any configured monitored directory
    #[error("'{0}' is not under any monitored directory")]
    NotConfigured(String),

    /// stat on a path failed for a reason other than absence
    #[error("failed to stat '{path}': {source}")]
    Stat {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Attribute or hash collection failed for a path
    #[error("failed to collect attributes for '{0}'")]
    Extract(String),

    /// Entry store errors
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The inode collision resolver could not make progress
    #[error("unresolvable collision for inode {inode} on device {dev}")]
    CollisionUnresolvable { inode: u64, dev: u64 },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FimError {
    /// Check if this error only affects a single path (the scan can continue)
    pub fn is_per_path(&self) -> bool {
        matches!(
            self,
            FimError::NotConfigured(_)
                | FimError::Stat { .. }
                | FimError::Extract(_)
                | FimError::CollisionUnresolvable { .. }
        )
    }
}

/// Entry store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The store reached its configured entry limit and refused an insert
    #[error("entry limit reached, insert refused")]
    Full,

    /// A path expected to be present was not found
    #[error("no stored entry for '{0}'")]
    NotFound(String),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No directories were given
    #[error("at least one directory to monitor is required")]
    NoDirectories,

    /// Invalid ignore or restrict pattern
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Invalid recursion level
    #[error("invalid recursion level {level}: must be at most {max}")]
    InvalidRecursionLevel { level: u32, max: u32 },

    /// Invalid entry limit
    #[error("invalid entry limit {limit}: must be at least {min}")]
    InvalidEntryLimit { limit: usize, min: usize },

    /// Unknown skip-filesystem name
    #[error("unknown filesystem '{0}': expected nfs, dev, sys or proc")]
    UnknownFilesystem(String),

    /// Output path error
    #[error("invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: String, reason: String },
}

/// Result type alias for FimError
pub type Result<T> = std::result::Result<T, FimError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;
