//! File reconciliation pipeline
//!
//! Takes one file through attribute collection and database reconciliation
//! under the entry lock, and classifies the result as an addition, a
//! modification, or nothing. Inode collisions detected here are handed to
//! the resolver with the lock released, then the insert is retried
//! unconditionally, matching the resolver's post-resolution contract.

use super::{FimEngine, ScanItem};
use crate::attributes::collect_attributes;
use crate::error::{FimError, StoreError};
use crate::event::{EventKind, EventParams};
use crate::store::EntryStore;
use crate::types::{Checks, FileData, ScanMode, WhodataEvent};
use serde_json::Value;
use std::fs;
use std::fs::Metadata;
use std::sync::atomic::Ordering;
use tracing::{debug, trace, warn};

/// Outcome of one reconciliation attempt
pub(crate) enum Reconcile {
    /// Checksum unchanged; the entry was marked scanned
    UpToDate,
    /// The entry was written; `saved` is the previous record, if any
    Stored { saved: Option<FileData> },
    /// Another path claims this (inode, dev); nothing was written
    Collision {
        saved: Option<FileData>,
        inode: u64,
        dev: u64,
    },
}

impl<S: EntryStore> FimEngine<S> {
    /// Run one file through the pipeline and emit the resulting event if
    /// the baseline is established and `report` allows it
    pub(crate) fn process_file(
        &self,
        path: &str,
        item: ScanItem,
        meta: &Metadata,
        whodata: Option<&WhodataEvent>,
        report: bool,
    ) {
        self.files_checked.fetch_add(1, Ordering::Relaxed);

        if let Some(event) = self.file_event(path, item, meta, whodata) {
            if report && self.baseline() {
                self.emit(event);
            }
        }
    }

    /// The pipeline proper; returns the event without emitting it
    fn file_event(
        &self,
        path: &str,
        item: ScanItem,
        meta: &Metadata,
        whodata: Option<&WhodataEvent>,
    ) -> Option<Value> {
        let mut store = self.store.lock();

        if item.mode == ScanMode::Scheduled {
            // A hard link may route the traversal to the same row twice in
            // one cycle; the scanned flag breaks the repeat
            match store.is_scanned(path) {
                Err(e) => {
                    trace!(path, error = %e, "scanned-flag query failed");
                    return None;
                }
                Ok(true) => return None,
                Ok(false) => {}
            }
        }

        let new = match collect_attributes(path, meta, item.checks, item.mode, &self.config) {
            Ok(new) => new,
            Err(e) => {
                debug!(path, error = %e, "could not collect attributes");
                return None;
            }
        };

        let saved = match self.reconcile(&mut *store, path, &new, item.mode) {
            Ok(Reconcile::UpToDate) => return None,
            Ok(Reconcile::Stored { saved }) => saved,
            Ok(Reconcile::Collision { saved, inode, dev }) => {
                drop(store);
                if let Err(e) = self.resolve_collision(inode, dev) {
                    warn!(path, error = %e, "failed to resolve an inode collision");
                    return None;
                }
                store = self.store.lock();
                if let Err(e) = store.insert(path, &new, saved.as_ref()) {
                    debug!(path, error = %e, "insert after collision resolution failed");
                    return None;
                }
                saved
            }
            Err(e) => {
                debug!(path, error = %e, "reconciliation failed");
                return None;
            }
        };

        self.build_change_event(&*store, path, item, saved.as_ref(), &new, whodata)
    }

    /// Classify added/modified, gather the optional content diff, and
    /// build the event (still under the entry lock for the hard-link
    /// enumeration)
    pub(crate) fn build_change_event(
        &self,
        store: &S,
        path: &str,
        item: ScanItem,
        old: Option<&FileData>,
        new: &FileData,
        whodata: Option<&WhodataEvent>,
    ) -> Option<Value> {
        let kind = if old.is_none() {
            EventKind::Added
        } else {
            EventKind::Modified
        };

        let diff = if item.checks.contains(Checks::SEECHANGES) {
            self.differ.as_ref().and_then(|d| d.file_diff(path))
        } else {
            None
        };

        crate::event::build_event(
            store,
            &EventParams {
                path,
                old,
                new,
                kind,
                mode: item.mode,
                whodata,
                diff: diff.as_deref(),
                tags: self.config.dirs[item.index].tags.as_deref(),
            },
        )
    }

    /// Bring the stored row for `path` in line with `new`.
    ///
    /// Watcher modes write through unconditionally (their watchers are
    /// trusted not to drop create/delete events). Scheduled mode checks the
    /// (inode, dev) identity and reports a collision instead of clobbering
    /// a row another path still owns.
    pub(crate) fn reconcile(
        &self,
        store: &mut S,
        path: &str,
        new: &FileData,
        mode: ScanMode,
    ) -> Result<Reconcile, StoreError> {
        let saved = store.get(path)?.map(|entry| entry.data);

        if mode != ScanMode::Scheduled {
            store.insert(path, new, saved.as_ref())?;
            return Ok(Reconcile::Stored { saved });
        }

        let Some(old) = saved else {
            if store.data_exists(new.inode, new.dev)? {
                return Ok(Reconcile::Collision {
                    saved: None,
                    inode: new.inode,
                    dev: new.dev,
                });
            }
            store.insert(path, new, None)?;
            return Ok(Reconcile::Stored { saved: None });
        };

        if new.checksum == old.checksum {
            store.set_scanned(path)?;
            return Ok(Reconcile::UpToDate);
        }

        if new.dev == old.dev && new.inode == old.inode {
            store.insert(path, new, Some(&old))?;
            return Ok(Reconcile::Stored { saved: Some(old) });
        }

        if store.data_exists(new.inode, new.dev)? {
            return Ok(Reconcile::Collision {
                saved: Some(old),
                inode: new.inode,
                dev: new.dev,
            });
        }

        store.insert(path, new, Some(&old))?;
        Ok(Reconcile::Stored { saved: Some(old) })
    }

    /// Re-run the pipeline for a path already known to the store, under a
    /// lock the caller holds. Used by the collision resolver once it has
    /// verified the path's on-disk identity is safe to write.
    pub(crate) fn refresh_stored(
        &self,
        store: &mut S,
        path: &str,
        index: usize,
        meta: &Metadata,
    ) -> Result<Option<Value>, FimError> {
        let item = ScanItem {
            mode: ScanMode::Scheduled,
            index,
            checks: self.config.dirs[index].checks,
        };

        match store.is_scanned(path) {
            Err(e) => {
                trace!(path, error = %e, "scanned-flag query failed");
                return Ok(None);
            }
            Ok(true) => return Ok(None),
            Ok(false) => {}
        }

        let new = collect_attributes(path, meta, item.checks, item.mode, &self.config)?;

        match self.reconcile(store, path, &new, item.mode)? {
            Reconcile::UpToDate => Ok(None),
            Reconcile::Stored { saved } => {
                Ok(self.build_change_event(&*store, path, item, saved.as_ref(), &new, None))
            }
            Reconcile::Collision { saved, .. } => {
                // The caller verified the identity was free; a conflict
                // here means the disk changed mid-resolution. Write anyway
                // to guarantee forward progress.
                store.insert(path, &new, saved.as_ref())?;
                Ok(self.build_change_event(&*store, path, item, saved.as_ref(), &new, None))
            }
        }
    }

    /// Update a stored row with no identity validation, always producing a
    /// modification event. Last resort of the collision resolver when the
    /// conflict graph has cycled.
    pub(crate) fn force_update(
        &self,
        store: &mut S,
        path: &str,
        index: usize,
        saved: &FileData,
    ) -> Result<Option<Value>, FimError> {
        let meta = fs::symlink_metadata(path).map_err(|e| FimError::Stat {
            path: path.to_string(),
            source: e,
        })?;

        let item = ScanItem {
            mode: ScanMode::Scheduled,
            index,
            checks: self.config.dirs[index].checks,
        };

        let new = collect_attributes(path, &meta, item.checks, item.mode, &self.config)?;
        store.insert(path, &new, Some(saved))?;

        Ok(self.build_change_event(&*store, path, item, Some(saved), &new, None))
    }
}
