//! Entry storage
//!
//! The engine talks to its database through the [`EntryStore`] trait: a
//! path-keyed map of attribute records with a secondary (inode, dev) index,
//! a per-scan `scanned` flag, and a capacity latch. All calls are made with
//! the engine's entry lock held, so implementations do not need their own
//! synchronization.
//!
//! # Module Structure
//!
//! - `sqlite`: the SQLite-backed implementation used in production and tests

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreResult;
use crate::types::{FileData, FileEntry};

/// Persistent map of monitored entries
pub trait EntryStore: Send {
    /// Path-keyed lookup
    fn get(&self, path: &str) -> StoreResult<Option<FileEntry>>;

    /// Upsert an entry. `old` is the caller's snapshot of the previous
    /// record for this path (it has just looked it up under the same lock);
    /// `None` means the path is new, which is when the capacity check
    /// applies. Returns [`crate::error::StoreError::Full`] when the store
    /// refuses a new path at capacity.
    fn insert(&mut self, path: &str, data: &FileData, old: Option<&FileData>) -> StoreResult<()>;

    /// Delete by path; `false` when the path was not present
    fn remove(&mut self, path: &str) -> StoreResult<bool>;

    /// Secondary-index probe: is (inode, dev) claimed by any path?
    fn data_exists(&self, inode: u64, dev: u64) -> StoreResult<bool>;

    /// All paths currently claiming (inode, dev), ordered
    fn paths_from_inode(&self, inode: u64, dev: u64) -> StoreResult<Vec<String>>;

    /// Paths matching a SQL LIKE pattern (used as `dir/%` to enumerate
    /// stored descendants of a deleted directory)
    fn paths_matching(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Clear the scanned flag on every entry (start of a scheduled scan)
    fn set_all_unscanned(&mut self) -> StoreResult<()>;

    /// Whether this path was already visited in the current scan cycle;
    /// `false` for unknown paths
    fn is_scanned(&self, path: &str) -> StoreResult<bool>;

    /// Mark one path as visited in the current scan cycle
    fn set_scanned(&mut self, path: &str) -> StoreResult<()>;

    /// Entries not visited in the current scan cycle (end-of-scan sweep)
    fn not_scanned(&self) -> StoreResult<Vec<FileEntry>>;

    /// Number of stored entries
    fn count(&self) -> StoreResult<usize>;

    /// Whether the store refused an insert at capacity and has not freed
    /// space since
    fn is_full(&self) -> bool;
}
