//! Core entry types and data structures
//!
//! These types represent monitored filesystem entries and the events that
//! triggered them. They are designed to round-trip through the entry store
//! without loss.

use serde::{Deserialize, Serialize};

/// The trigger that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScanMode {
    /// Periodic full-tree traversal
    Scheduled = 0,
    /// Event-driven update from an OS watcher
    Realtime = 1,
    /// Event-driven update carrying process/user provenance
    Whodata = 2,
}

impl ScanMode {
    /// Convert from u8 (database value)
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ScanMode::Realtime,
            2 => ScanMode::Whodata,
            _ => ScanMode::Scheduled,
        }
    }

    /// Get database integer representation
    pub fn as_db_int(&self) -> i64 {
        *self as i64
    }

    /// Wire name used in emitted events
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Scheduled => "scheduled",
            ScanMode::Realtime => "realtime",
            ScanMode::Whodata => "whodata",
        }
    }
}

/// Per-directory attribute selection and behavior mask
///
/// Each bit enables collection (and comparison) of one attribute family,
/// or toggles a per-directory behavior. Unset attribute bits leave the
/// corresponding `FileData` field empty/zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checks(pub u32);

impl Checks {
    pub const SIZE: Checks = Checks(1 << 0);
    pub const PERM: Checks = Checks(1 << 1);
    pub const OWNER: Checks = Checks(1 << 2);
    pub const GROUP: Checks = Checks(1 << 3);
    pub const MTIME: Checks = Checks(1 << 4);
    pub const INODE: Checks = Checks(1 << 5);
    pub const MD5: Checks = Checks(1 << 6);
    pub const SHA1: Checks = Checks(1 << 7);
    pub const SHA256: Checks = Checks(1 << 8);
    /// Produce content diffs for modified files (delegated to the differ)
    pub const SEECHANGES: Checks = Checks(1 << 9);
    /// Follow a symlinked monitored root to its current target
    pub const FOLLOW: Checks = Checks(1 << 10);
    /// Directory is watched by the realtime collaborator
    pub const REALTIME: Checks = Checks(1 << 11);
    /// Directory is watched by the whodata collaborator
    pub const WHODATA: Checks = Checks(1 << 12);

    /// All attribute-collection bits (no behavior bits)
    pub const DEFAULT: Checks = Checks(
        Self::SIZE.0
            | Self::PERM.0
            | Self::OWNER.0
            | Self::GROUP.0
            | Self::MTIME.0
            | Self::INODE.0
            | Self::MD5.0
            | Self::SHA1.0
            | Self::SHA256.0,
    );

    pub const fn empty() -> Checks {
        Checks(0)
    }

    pub fn contains(&self, other: Checks) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any of the three content-hash bits
    pub fn wants_hashes(&self) -> bool {
        self.0 & (Self::MD5.0 | Self::SHA1.0 | Self::SHA256.0) != 0
    }

    pub fn with(self, other: Checks) -> Checks {
        Checks(self.0 | other.0)
    }

    pub fn without(self, other: Checks) -> Checks {
        Checks(self.0 & !other.0)
    }
}

impl Default for Checks {
    fn default() -> Self {
        Checks::DEFAULT
    }
}

/// Attribute record for one monitored filesystem entry
///
/// Constructed by the attribute collector, immutable once the checksum is
/// computed. Fields whose check bit is unset stay empty (strings) or zero
/// (numbers) so the canonical checksum string is total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub size: u64,
    /// Symbolic permission string, e.g. `rw-r--r--`
    pub perm: String,
    /// DOS-style attribute string; always empty on this build
    pub attributes: String,
    /// Owner uid as a decimal string
    pub uid: String,
    /// Owning group gid as a decimal string
    pub gid: String,
    pub user_name: String,
    pub group_name: String,
    pub mtime: i64,
    pub inode: u64,
    pub dev: u64,
    pub hash_md5: String,
    pub hash_sha1: String,
    pub hash_sha256: String,
    /// SHA-1 of [`FileData::canonical_string`], hex encoded
    pub checksum: String,
    pub options: Checks,
    pub mode: ScanMode,
    /// Unix timestamp of the last observation of this entry
    pub last_event: i64,
    pub scanned: bool,
}

impl FileData {
    /// Canonical colon-separated concatenation of the attribute fields.
    ///
    /// The field order is fixed; changing it would silently invalidate
    /// every stored checksum.
    pub fn canonical_string(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.size,
            self.perm,
            self.attributes,
            self.uid,
            self.gid,
            self.user_name,
            self.group_name,
            self.mtime,
            self.inode,
            self.hash_md5,
            self.hash_sha1,
            self.hash_sha256,
        )
    }

    /// Recompute `checksum` from the current field values
    pub fn refresh_checksum(&mut self) {
        self.checksum = crate::hash::sha1_hex(&self.canonical_string());
    }
}

impl Default for FileData {
    fn default() -> Self {
        Self {
            size: 0,
            perm: String::new(),
            attributes: String::new(),
            uid: String::new(),
            gid: String::new(),
            user_name: String::new(),
            group_name: String::new(),
            mtime: 0,
            inode: 0,
            dev: 0,
            hash_md5: String::new(),
            hash_sha1: String::new(),
            hash_sha256: String::new(),
            checksum: String::new(),
            options: Checks::empty(),
            mode: ScanMode::Scheduled,
            last_event: 0,
            scanned: true,
        }
    }
}

/// A stored entry: the path key plus its attribute record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub data: FileData,
}

/// Provenance record delivered by the whodata collaborator
///
/// The inode and device arrive as decimal strings on the audit wire and are
/// parsed lazily when the engine needs them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhodataEvent {
    pub path: String,
    pub user_id: String,
    pub user_name: String,
    pub group_id: String,
    pub group_name: String,
    pub process_name: String,
    pub process_id: i64,
    pub ppid: i64,
    pub cwd: String,
    pub parent_name: String,
    pub parent_cwd: String,
    pub audit_uid: String,
    pub audit_name: String,
    pub effective_uid: String,
    pub effective_name: String,
    pub inode: String,
    pub dev: String,
}

impl WhodataEvent {
    /// Parse the audit-wire inode as a number; 0 when absent or malformed
    pub fn inode_number(&self) -> u64 {
        self.inode.parse().unwrap_or(0)
    }

    /// Parse the audit-wire device as a number; 0 when absent or malformed
    pub fn dev_number(&self) -> u64 {
        self.dev.parse().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_mode_roundtrip() {
        for mode in [ScanMode::Scheduled, ScanMode::Realtime, ScanMode::Whodata] {
            assert_eq!(ScanMode::from_u8(mode.as_db_int() as u8), mode);
        }
        assert_eq!(ScanMode::from_u8(99), ScanMode::Scheduled);
    }

    #[test]
    fn test_checks_operations() {
        let checks = Checks::DEFAULT;
        assert!(checks.contains(Checks::SIZE));
        assert!(checks.contains(Checks::SHA256));
        assert!(!checks.contains(Checks::REALTIME));
        assert!(checks.wants_hashes());

        let no_hashes = checks
            .without(Checks::MD5)
            .without(Checks::SHA1)
            .without(Checks::SHA256);
        assert!(!no_hashes.wants_hashes());

        let rt = Checks::empty().with(Checks::REALTIME);
        assert!(rt.contains(Checks::REALTIME));
        assert!(!rt.contains(Checks::SIZE));
    }

    #[test]
    fn test_canonical_string_layout() {
        let data = FileData {
            size: 10,
            perm: "rw-r--r--".into(),
            uid: "0".into(),
            gid: "0".into(),
            user_name: "root".into(),
            group_name: "root".into(),
            mtime: 1500000000,
            inode: 606060,
            hash_md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
            hash_sha1: "da39a3ee5e6b4b0d3255bfef95601890afd80709".into(),
            hash_sha256: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855".into(),
            ..FileData::default()
        };

        assert_eq!(
            data.canonical_string(),
            "10:rw-r--r--::0:0:root:root:1500000000:606060:\
             d41d8cd98f00b204e9800998ecf8427e:\
             da39a3ee5e6b4b0d3255bfef95601890afd80709:\
             e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_whodata_identity_parsing() {
        let evt = WhodataEvent {
            inode: "1234".into(),
            dev: "64768".into(),
            ..WhodataEvent::default()
        };
        assert_eq!(evt.inode_number(), 1234);
        assert_eq!(evt.dev_number(), 64768);

        let empty = WhodataEvent::default();
        assert_eq!(empty.inode_number(), 0);
    }
}
