//! The monitoring engine
//!
//! Owns the entry store and serializes the three event sources through one
//! reconciliation pipeline:
//!
//! ```text
//!  scheduled scan ──┐
//!  realtime event ──┼──► checker ──► attribute collection ──► reconcile
//!  whodata event ───┘      │                                     │
//!                          │ (entry lock held)                   │
//!                          ▼                                     ▼
//!                    policy filters                      entry store (SQLite)
//!                    ignore / restrict                   + inode collision
//!                    skip-fs / throttle                    resolver
//!                                                              │
//!                                                              ▼
//!                                                        event builder ──► sink
//! ```
//!
//! # Locks
//!
//! - the entry lock guards every store access and is released across event
//!   emission
//! - the scan lock keeps two scheduled scans from overlapping
//! - the symlink lock (inside the config) guards real-path resolution
//!
//! The first completed scheduled scan establishes the baseline; until then
//! no add/modify events leave the engine.

mod collision;
mod pipeline;
mod scanner;
mod throttle;

pub use throttle::EventThrottle;

use crate::config::MonitorConfig;
use crate::event::{self, EventKind, EventParams, ScanInfo};
use crate::state::{DbState, DbStateMonitor};
use crate::store::EntryStore;
use crate::transport::{ContentDiffer, EventSink, RealtimeController};
use crate::types::{Checks, FileEntry, ScanMode, WhodataEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Per-path context threaded through the checker
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanItem {
    pub mode: ScanMode,
    pub index: usize,
    pub checks: Checks,
}

impl ScanItem {
    fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            index: 0,
            checks: Checks::empty(),
        }
    }
}

/// Result of one scheduled scan
#[derive(Debug, Clone)]
pub struct ScanSummary {
    /// Unix timestamp at the end of the scan
    pub timestamp: i64,
    pub duration: Duration,
    /// Files run through the pipeline during this scan
    pub files_checked: u64,
    /// Events emitted during this scan
    pub events: u64,
    /// Entries stored at the end of the scan
    pub entries: usize,
}

/// The file integrity monitoring engine
pub struct FimEngine<S: EntryStore> {
    pub(crate) config: Arc<MonitorConfig>,
    store: Mutex<S>,
    scan_lock: Mutex<()>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) differ: Option<Arc<dyn ContentDiffer>>,
    pub(crate) realtime: Option<Arc<dyn RealtimeController>>,
    pub(crate) throttle: EventThrottle,
    baseline: AtomicBool,
    db_state: Mutex<DbStateMonitor>,
    shutdown: Arc<AtomicBool>,
    pub(crate) files_checked: AtomicU64,
    events_sent: AtomicU64,
}

impl<S: EntryStore> FimEngine<S> {
    pub fn new(config: Arc<MonitorConfig>, store: S, sink: Arc<dyn EventSink>) -> Self {
        let throttle = EventThrottle::new(config.max_eps);
        Self {
            config,
            store: Mutex::new(store),
            scan_lock: Mutex::new(()),
            sink,
            differ: None,
            realtime: None,
            throttle,
            baseline: AtomicBool::new(false),
            db_state: Mutex::new(DbStateMonitor::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            files_checked: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
        }
    }

    /// Attach the content-diff collaborator
    pub fn with_differ(mut self, differ: Arc<dyn ContentDiffer>) -> Self {
        self.differ = Some(differ);
        self
    }

    /// Attach the realtime watcher collaborator
    pub fn with_realtime(mut self, realtime: Arc<dyn RealtimeController>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    /// Flag that cleanly stops an in-flight traversal when set
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Whether the baseline scan has completed
    pub fn baseline(&self) -> bool {
        self.baseline.load(Ordering::SeqCst)
    }

    /// Override the baseline flag (restores a persisted baseline)
    pub fn set_baseline(&self, established: bool) {
        self.baseline.store(established, Ordering::SeqCst);
    }

    /// Current capacity band
    pub fn db_state(&self) -> DbState {
        self.db_state.lock().state()
    }

    /// Lock the entry store for direct inspection
    pub fn store(&self) -> parking_lot::MutexGuard<'_, S> {
        self.store.lock()
    }

    pub(crate) fn emit(&self, event: Value) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        self.sink.send_event(event);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Run one full scheduled scan cycle.
    ///
    /// Marks every stored entry unscanned, traverses each monitored root,
    /// sweeps entries the traversal did not reach into deletion events,
    /// re-checks capacity, and finally establishes the baseline on the
    /// first run. A scan stopped by the shutdown flag skips the sweep and
    /// leaves the baseline untouched.
    pub fn scan(&self) -> ScanSummary {
        let started = Instant::now();
        let start_ts = chrono::Utc::now().timestamp();
        let files_before = self.files_checked.load(Ordering::Relaxed);
        let events_before = self.events_sent.load(Ordering::Relaxed);

        info!("file integrity scan started");
        self.sink
            .send_event(event::scan_info_json(ScanInfo::Start, start_ts));

        if let Some(differ) = &self.differ {
            differ.refresh_quota();
        }

        let scan_guard = self.scan_lock.lock();

        if let Err(e) = self.store.lock().set_all_unscanned() {
            error!(error = %e, "failed to reset scan flags");
        }

        for index in 0..self.config.dirs.len() {
            if self.is_shutdown() {
                break;
            }
            let Some(real_path) = self.config.real_path(index) else {
                debug!(index, "skipping a monitored root with a broken link");
                continue;
            };

            let checks = self.config.dirs[index].checks;
            let item = ScanItem {
                mode: ScanMode::Scheduled,
                index,
                checks,
            };
            self.check_path(&real_path, item, None, true);

            if let Some(rt) = &self.realtime {
                if checks.contains(Checks::REALTIME) {
                    rt.add_watch(&real_path, checks.contains(Checks::FOLLOW));
                }
            }
        }

        drop(scan_guard);

        // A traversal cut short has not seen the whole tree; the deletion
        // sweep and the baseline only apply to a completed cycle
        let interrupted = self.is_shutdown();

        if !interrupted {
            let mut nodes = 0usize;
            if self.config.file_limit_enabled {
                nodes = self.store.lock().count().unwrap_or(0);
            }

            self.sweep_deleted();

            if self.config.file_limit_enabled && nodes >= self.config.file_limit {
                // Refill pass: the sweep may have freed rows, so refresh
                // metadata without reporting until the store fills again
                let _scan_guard = self.scan_lock.lock();
                for index in 0..self.config.dirs.len() {
                    if self.store.lock().is_full() || self.is_shutdown() {
                        break;
                    }
                    let Some(real_path) = self.config.real_path(index) else {
                        continue;
                    };
                    let item = ScanItem {
                        mode: ScanMode::Scheduled,
                        index,
                        checks: self.config.dirs[index].checks,
                    };
                    self.check_path(&real_path, item, None, false);
                }
            }

            if self.config.file_limit_enabled {
                debug!(limit = self.config.file_limit, "checking database capacity");
                self.check_db_state();
            } else {
                debug!("no entry limit configured");
            }

            if !self.baseline.swap(true, Ordering::SeqCst) {
                debug!("baseline established, subsequent changes will be reported");
            } else if let Some(rt) = &self.realtime {
                if rt.queue_overflow() {
                    warn!("realtime watcher overflowed, rebuilding the watch map");
                    rt.sanitize();
                }
            }
        }

        let end_ts = chrono::Utc::now().timestamp();
        if interrupted {
            info!("file integrity scan interrupted");
        } else {
            info!("file integrity scan finished");
        }
        self.sink
            .send_event(event::scan_info_json(ScanInfo::End, end_ts));

        let entries = self.store.lock().count().unwrap_or(0);
        let summary = ScanSummary {
            timestamp: end_ts,
            duration: started.elapsed(),
            files_checked: self.files_checked.load(Ordering::Relaxed) - files_before,
            events: self.events_sent.load(Ordering::Relaxed) - events_before,
            entries,
        };
        debug!(
            duration_ms = summary.duration.as_millis() as u64,
            files = summary.files_checked,
            events = summary.events,
            entries = summary.entries,
            "scan cycle complete"
        );
        summary
    }

    /// Entry point for the realtime watcher thread
    pub fn realtime_event(&self, path: &str) {
        if fs::symlink_metadata(path).is_ok() {
            // Let editor write-replace sequences settle before reading
            self.settle();
            self.check_path(path, ScanItem::new(ScanMode::Realtime), None, true);
        } else {
            self.process_missing_entry(path, ScanMode::Realtime, None);
        }
    }

    /// Entry point for the whodata watcher thread
    pub fn whodata_event(&self, evt: &WhodataEvent) {
        if fs::symlink_metadata(&evt.path).is_ok() {
            self.settle();
            self.check_path(&evt.path, ScanItem::new(ScanMode::Whodata), Some(evt), true);
            return;
        }

        self.process_missing_entry(&evt.path, ScanMode::Whodata, Some(evt));

        // A vanished path may leave hard-linked siblings behind; re-check
        // everything that claims the event's identity
        let (inode, dev) = (evt.inode_number(), evt.dev_number());
        if inode != 0 {
            let paths = { self.store.lock().paths_from_inode(inode, dev) };
            match paths {
                Ok(paths) => {
                    for path in paths {
                        self.process_missing_entry(&path, ScanMode::Whodata, Some(evt));
                    }
                }
                Err(e) => warn!(inode, dev, error = %e, "failed to enumerate inode paths"),
            }
        }
    }

    /// Reconcile a path that vanished between watcher delivery and stat.
    ///
    /// A stored path goes through the checker (which observes the absence
    /// and emits the deletion); an unknown path may be a removed directory
    /// whose stored descendants each get a deletion event.
    pub fn process_missing_entry(&self, path: &str, mode: ScanMode, whodata: Option<&WhodataEvent>) {
        let saved = { self.store.lock().get(path) };
        match saved {
            Ok(Some(_)) => {
                self.check_path(path, ScanItem::new(mode), whodata, true);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path, error = %e, "lookup failed for a missing entry");
                return;
            }
        }

        let pattern = format!("{}/%", path.trim_end_matches('/'));
        let descendants = { self.store.lock().paths_matching(&pattern) };
        let descendants = match descendants {
            Ok(paths) => paths,
            Err(e) => {
                warn!(path, error = %e, "descendant enumeration failed");
                return;
            }
        };

        for descendant in descendants {
            let entry = { self.store.lock().get(&descendant) };
            if let Ok(Some(entry)) = entry {
                self.delete_entry(&entry, true, mode, whodata);
            }
        }
    }

    /// Remove one stored entry and emit its deletion event.
    ///
    /// Watcher-driven deletions are dropped when the owning directory is
    /// not configured for that mode; scheduled deletions always run so the
    /// database stays truthful.
    pub(crate) fn delete_entry(
        &self,
        entry: &FileEntry,
        emit_alert: bool,
        mode: ScanMode,
        whodata: Option<&WhodataEvent>,
    ) {
        let Some(index) = self.config.directory_index(&entry.path) else {
            trace!(path = entry.path.as_str(), "deletion for an unconfigured path, dropping");
            return;
        };
        let dir = &self.config.dirs[index];

        match mode {
            ScanMode::Realtime if !dir.checks.contains(Checks::REALTIME) => return,
            ScanMode::Whodata if !dir.checks.contains(Checks::WHODATA) => return,
            _ => {}
        }

        if dir.checks.contains(Checks::SEECHANGES) {
            if let Some(differ) = &self.differ {
                differ.process_delete(&entry.path);
            }
        }

        let event = {
            let mut store = self.store.lock();
            if let Err(e) = store.remove(&entry.path) {
                warn!(path = entry.path.as_str(), error = %e, "failed to remove entry");
                return;
            }
            if emit_alert {
                event::build_event(
                    &*store,
                    &EventParams {
                        path: &entry.path,
                        old: None,
                        new: &entry.data,
                        kind: EventKind::Deleted,
                        mode,
                        whodata,
                        diff: None,
                        tags: dir.tags.as_deref(),
                    },
                )
            } else {
                None
            }
        };

        if let Some(event) = event {
            trace!(path = entry.path.as_str(), "file deleted");
            self.emit(event);
        }
    }

    /// End-of-scan sweep: everything the traversal did not mark scanned is
    /// gone from disk and becomes a deletion event
    pub(crate) fn sweep_deleted(&self) {
        let stale = {
            let store = self.store.lock();
            store.not_scanned()
        };
        let stale = match stale {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "failed to enumerate unscanned entries");
                return;
            }
        };

        for entry in stale {
            self.delete_entry(&entry, true, ScanMode::Scheduled, None);
        }
    }

    /// Observe the entry count against the configured limit and raise a
    /// capacity alert on band transitions
    pub fn check_db_state(&self) {
        let count = match self.store.lock().count() {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "failed to count entries");
                return;
            }
        };

        let alert = self.db_state.lock().observe(count, self.config.file_limit);
        if let Some(alert) = alert {
            self.sink.send_log(&format!("wazuh: FIM DB: {alert}"));
        }
    }

    fn settle(&self) {
        if self.config.rt_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.rt_delay_ms));
        }
    }
}
