//! Inode collision resolver
//!
//! A scheduled scan can find a path whose on-disk (inode, dev) is still
//! claimed by a different stored path, typically after delete-then-rename
//! sequences recycled an inode. The resolver walks the conflict graph with
//! a LIFO stack of stored paths and a visited set, re-checking each path
//! against disk: vanished paths leave the store (with a deletion event),
//! settled paths are refreshed through the normal pipeline, and paths whose
//! new identity is itself contested widen the working set. When the graph
//! cycles and nothing new can be queued, the top path is updated by force,
//! trading a possible false positive for guaranteed termination.
//!
//! The entry lock is taken per step, never across the whole walk, so
//! watcher events keep flowing while a large conflict graph drains.

use super::FimEngine;
use crate::error::{FimError, StoreError};
use crate::event::{self, EventKind, EventParams};
use crate::store::EntryStore;
use crate::types::{Checks, ScanMode};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use tracing::warn;

/// How one stored path came out of a resolver step
enum StoredPathOutcome {
    /// Refreshed (or force-updated) in the store
    Updated,
    /// Removed from the store
    Deleted,
    /// New conflicting paths were queued; retry from the new top
    AddedPaths,
}

impl<S: EntryStore> FimEngine<S> {
    /// Resolve the conflict on (inode, dev) so the caller can insert.
    ///
    /// On success every stored path that claimed the identity has been
    /// deleted, refreshed, or force-updated; collected events are emitted
    /// with the entry lock released.
    pub(crate) fn resolve_collision(&self, inode: u64, dev: u64) -> Result<(), FimError> {
        let mut stack: Vec<String> = Vec::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();

        {
            let store = self.store.lock();
            append_conflicting_paths(&*store, inode, dev, &mut stack, &mut visited)?;
        }

        while let Some(current) = stack.last().cloned() {
            let mut event: Option<Value> = None;
            let outcome = {
                let mut store = self.store.lock();
                self.process_stored_path(&mut *store, &current, &mut stack, &mut visited, &mut event)
            };

            match outcome? {
                StoredPathOutcome::Updated | StoredPathOutcome::Deleted => {
                    stack.pop();
                }
                StoredPathOutcome::AddedPaths => {}
            }

            if let Some(event) = event {
                self.emit(event);
            }
        }

        Ok(())
    }

    /// One resolver step for a stored path, under the entry lock
    fn process_stored_path(
        &self,
        store: &mut S,
        path: &str,
        stack: &mut Vec<String>,
        visited: &mut BTreeSet<String>,
        event: &mut Option<Value>,
    ) -> Result<StoredPathOutcome, FimError> {
        let entry = store
            .get(path)?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let index = self
                    .config
                    .directory_index(path)
                    .ok_or_else(|| FimError::NotConfigured(path.to_string()))?;
                let dir = &self.config.dirs[index];

                if dir.checks.contains(Checks::SEECHANGES) {
                    if let Some(differ) = &self.differ {
                        differ.process_delete(path);
                    }
                }

                store.remove(path)?;
                *event = event::build_event(
                    &*store,
                    &EventParams {
                        path,
                        old: None,
                        new: &entry.data,
                        kind: EventKind::Deleted,
                        mode: ScanMode::Scheduled,
                        whodata: None,
                        diff: None,
                        tags: dir.tags.as_deref(),
                    },
                );
                return Ok(StoredPathOutcome::Deleted);
            }
            Err(e) => {
                return Err(FimError::Stat {
                    path: path.to_string(),
                    source: e,
                })
            }
        };

        let index = self
            .config
            .directory_index(path)
            .ok_or_else(|| FimError::NotConfigured(path.to_string()))?;

        // Identity unchanged on disk: the row just needs a refresh
        if entry.data.dev == meta.dev() && entry.data.inode == meta.ino() {
            *event = self.refresh_stored(store, path, index, &meta)?;
            return Ok(StoredPathOutcome::Updated);
        }

        // The path moved to a new identity; write through if it is free
        if !store.data_exists(meta.ino(), meta.dev())? {
            *event = self.refresh_stored(store, path, index, &meta)?;
            return Ok(StoredPathOutcome::Updated);
        }

        // Contested as well: queue its claimants first
        let added = append_conflicting_paths(&*store, meta.ino(), meta.dev(), stack, visited)?;
        if added == 0 {
            // Every claimant is already queued: the graph has cycled and
            // forcing the update is the only way out
            warn!(path, "conflicting inode graph saturated, forcing an update");
            *event = self.force_update(store, path, index, &entry.data)?;
            return Ok(StoredPathOutcome::Updated);
        }

        Ok(StoredPathOutcome::AddedPaths)
    }
}

/// Queue every path claiming (inode, dev) that has not been queued before;
/// returns how many were added
fn append_conflicting_paths<S: EntryStore + ?Sized>(
    store: &S,
    inode: u64,
    dev: u64,
    stack: &mut Vec<String>,
    visited: &mut BTreeSet<String>,
) -> Result<usize, FimError> {
    let mut added = 0;
    for path in store.paths_from_inode(inode, dev)? {
        if visited.insert(path.clone()) {
            stack.push(path);
            added += 1;
        }
    }
    Ok(added)
}
