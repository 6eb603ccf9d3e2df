//! Recursive path checker and directory traversal
//!
//! The checker is the shared front door for all three event sources: it
//! validates the path against the configuration (owning directory, mode
//! alignment, recursion level), stats it, applies the policy filters, and
//! dispatches files into the reconciliation pipeline or descends into
//! directories.

use super::{FimEngine, ScanItem};
use crate::store::EntryStore;
use crate::types::{Checks, ScanMode, WhodataEvent};
use std::fs;
use std::io;
use tracing::{debug, trace, warn};

/// Filesystem magic numbers recognized by the skip filter
#[cfg(target_os = "linux")]
mod magic {
    pub const NFS_SUPER: i64 = 0x6969;
    pub const CIFS: i64 = 0xFF53_4D42;
    pub const PROC_SUPER: i64 = 0x9fa0;
    pub const SYSFS: i64 = 0x6265_6572;
    pub const DEVFS_SUPER: i64 = 0x1373;
}

impl<S: EntryStore> FimEngine<S> {
    /// Validate `path` against the configuration and dispatch it.
    ///
    /// `report` suppresses emission (but not database updates) during
    /// refill passes. Absent paths route into the deletion handler.
    pub(crate) fn check_path(
        &self,
        path: &str,
        mut item: ScanItem,
        whodata: Option<&WhodataEvent>,
        report: bool,
    ) {
        let Some(index) = self.config.directory_index(path) else {
            trace!(path, "not under any monitored directory");
            return;
        };

        // A subtree with its own configuration entry is visited by the
        // scan loop under its own index
        if item.mode == ScanMode::Scheduled && item.index != index {
            return;
        }

        // Watcher events only apply to directories configured for that
        // watcher; scheduled scans process everything so discarded watcher
        // events still surface eventually
        if item.mode != ScanMode::Scheduled && item.mode != self.config.dirs[index].mode() {
            return;
        }

        let Some(depth) = self.config.recursion_depth(path, index) else {
            return;
        };
        let level = self.config.dirs[index].recursion_level as i64;
        if depth > level {
            trace!(path, depth, level, "beyond the recursion level");
            return;
        }

        item.index = index;
        item.checks = self.config.dirs[index].checks;

        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.handle_vanished(path, item, whodata);
                return;
            }
            Err(e) => {
                debug!(path, error = %e, "stat failed");
                return;
            }
        };

        if self.skip_filesystem(path) {
            return;
        }

        let file_type = meta.file_type();
        if file_type.is_file() || file_type.is_symlink() {
            if self.config.is_ignored(path) {
                return;
            }
            if !self.config.restrict_allows(path, item.index) {
                return;
            }

            self.throttle.acquire();
            self.process_file(path, item, &meta, whodata, report);
        } else if file_type.is_dir() {
            if depth == level {
                trace!(path, depth, "directory at the recursion level, not descending");
                return;
            }
            if let Some(rt) = &self.realtime {
                if item.checks.contains(Checks::REALTIME) {
                    rt.add_watch(path, item.checks.contains(Checks::FOLLOW));
                }
            }
            self.walk_directory(path, item, whodata, report);
        }
    }

    /// The path stat'd ENOENT: a stored entry becomes a deletion, an
    /// unknown one at most clears its diff snapshot
    fn handle_vanished(&self, path: &str, item: ScanItem, whodata: Option<&WhodataEvent>) {
        let saved = { self.store.lock().get(path) };
        match saved {
            Ok(Some(entry)) => self.delete_entry(&entry, true, item.mode, whodata),
            Ok(None) => {
                if item.checks.contains(Checks::SEECHANGES) {
                    if let Some(differ) = &self.differ {
                        differ.process_delete(path);
                    }
                }
            }
            Err(e) => debug!(path, error = %e, "lookup failed for a vanished path"),
        }
    }

    fn walk_directory(
        &self,
        dir: &str,
        item: ScanItem,
        whodata: Option<&WhodataEvent>,
        report: bool,
    ) {
        let reader = match fs::read_dir(dir) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(dir, error = %e, "failed to open directory");
                return;
            }
        };

        for dirent in reader {
            if self.is_shutdown() {
                return;
            }

            let dirent = match dirent {
                Ok(dirent) => dirent,
                Err(e) => {
                    warn!(dir, error = %e, "failed to read a directory entry");
                    continue;
                }
            };

            let name = dirent.file_name();
            let name = name.to_string_lossy();
            let child = if dir.ends_with('/') {
                format!("{dir}{name}")
            } else {
                format!("{dir}/{name}")
            };

            self.check_path(&child, item, whodata, report);
        }
    }

    /// Whether the path sits on a filesystem type the configuration skips
    pub(crate) fn skip_filesystem(&self, path: &str) -> bool {
        if !self.config.skip_fs.any() {
            return false;
        }

        let Some(fs_type) = filesystem_magic(path) else {
            return false;
        };

        #[cfg(target_os = "linux")]
        {
            let skip = &self.config.skip_fs;
            let skipped = (skip.nfs && (fs_type == magic::NFS_SUPER || fs_type == magic::CIFS))
                || (skip.dev && fs_type == magic::DEVFS_SUPER)
                || (skip.sys && fs_type == magic::SYSFS)
                || (skip.proc && fs_type == magic::PROC_SUPER);
            if skipped {
                debug!(path, fs_type, "skipping an entry on an excluded filesystem");
            }
            skipped
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = fs_type;
            false
        }
    }
}

#[cfg(target_os = "linux")]
fn filesystem_magic(path: &str) -> Option<i64> {
    use std::ffi::CString;

    let c_path = CString::new(path).ok()?;
    let mut buf: libc::statfs = unsafe { std::mem::zeroed() };

    // Safety: c_path is NUL terminated and buf is a plain output struct
    let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut buf) };
    if rc != 0 {
        return None;
    }
    Some(buf.f_type as i64)
}

#[cfg(not(target_os = "linux"))]
fn filesystem_magic(_path: &str) -> Option<i64> {
    None
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_magic_proc() {
        let fs_type = filesystem_magic("/proc").unwrap();
        assert_eq!(fs_type, magic::PROC_SUPER);
    }

    #[test]
    fn test_filesystem_magic_missing_path() {
        assert!(filesystem_magic("/definitely/not/here").is_none());
    }
}
