//! Attribute collection for monitored entries
//!
//! Builds an immutable [`FileData`] record from a path, a check mask and a
//! pre-obtained stat result. Each field is filled only when its check bit
//! is set; unset string fields stay empty and unset numeric fields stay
//! zero so the canonical checksum string is total.
//!
//! Hashes are computed only for regular files with `0 < size < cap` and
//! only when at least one hash bit is set. Symbolic links, empty files and
//! oversized files keep the fixed empty-input digests.

use crate::config::MonitorConfig;
use crate::error::{FimError, Result};
use crate::hash::{self, FileHashes};
use crate::types::{Checks, FileData, ScanMode};
use std::ffi::CStr;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::debug;

/// Build a [`FileData`] for `path` from an already-obtained stat result.
///
/// Fails when hashing is required but unreadable; metadata itself comes
/// from the caller's stat and cannot fail here.
pub fn collect_attributes(
    path: &str,
    meta: &Metadata,
    checks: Checks,
    mode: ScanMode,
    config: &MonitorConfig,
) -> Result<FileData> {
    let mut data = FileData {
        options: checks,
        mode,
        last_event: chrono::Utc::now().timestamp(),
        scanned: true,
        ..FileData::default()
    };

    if checks.contains(Checks::SIZE) {
        data.size = meta.len();
    }

    if checks.contains(Checks::PERM) {
        data.perm = symbolic_mode(meta.mode());
    }

    if checks.contains(Checks::MTIME) {
        data.mtime = meta.mtime();
    }

    if checks.contains(Checks::OWNER) {
        data.uid = meta.uid().to_string();
        data.user_name = user_name(meta.uid()).unwrap_or_default();
    }

    if checks.contains(Checks::GROUP) {
        data.gid = meta.gid().to_string();
        data.group_name = group_name(meta.gid()).unwrap_or_default();
    }

    // Start from the empty-input digests so unhashed entries still compare
    let mut hashes = FileHashes::empty();

    if meta.file_type().is_file()
        && meta.len() > 0
        && meta.len() < config.max_file_size
        && checks.wants_hashes()
    {
        hashes = hash::hash_file(
            Path::new(path),
            config.max_file_size,
            config.prefilter_cmd.as_deref(),
        )
        .map_err(|e| {
            debug!(path, error = %e, "hashing failed");
            FimError::Extract(path.to_string())
        })?;
    }

    data.hash_md5 = if checks.contains(Checks::MD5) {
        hashes.md5
    } else {
        String::new()
    };
    data.hash_sha1 = if checks.contains(Checks::SHA1) {
        hashes.sha1
    } else {
        String::new()
    };
    data.hash_sha256 = if checks.contains(Checks::SHA256) {
        hashes.sha256
    } else {
        String::new()
    };

    data.inode = meta.ino();
    data.dev = meta.dev();
    data.refresh_checksum();

    Ok(data)
}

/// Render mode bits as the 9-character symbolic string (`rwxr-xr-x`),
/// folding setuid/setgid/sticky into the execute columns.
pub fn symbolic_mode(mode: u32) -> String {
    let mut out = String::with_capacity(9);

    for (shift, special, special_char) in [
        (6, mode & 0o4000 != 0, 's'),
        (3, mode & 0o2000 != 0, 's'),
        (0, mode & 0o1000 != 0, 't'),
    ] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(match (bits & 0o1 != 0, special) {
            (true, true) => special_char,
            (true, false) => 'x',
            (false, true) => special_char.to_ascii_uppercase(),
            (false, false) => '-',
        });
    }

    out
}

/// Resolve a uid to a user name via the system account database
pub fn user_name(uid: u32) -> Option<String> {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = [0i8; 2048];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // Safety: all out-pointers reference live stack storage and getpwuid_r
    // writes only within the provided buffer.
    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }

    // Safety: on success pw_name points into `buf`, NUL terminated.
    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    Some(name.to_string_lossy().into_owned())
}

/// Resolve a gid to a group name via the system account database
pub fn group_name(gid: u32) -> Option<String> {
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut buf = [0i8; 2048];
    let mut result: *mut libc::group = std::ptr::null_mut();

    // Safety: same contract as getpwuid_r above.
    let rc = unsafe {
        libc::getgrgid_r(
            gid,
            &mut grp,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }

    // Safety: on success gr_name points into `buf`, NUL terminated.
    let name = unsafe { CStr::from_ptr(grp.gr_name) };
    Some(name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitoredDir;
    use crate::hash::{MD5_EMPTY, SHA1_EMPTY, SHA256_EMPTY};
    use std::fs;
    use std::io::Write;

    fn test_config() -> MonitorConfig {
        MonitorConfig::new(vec![MonitoredDir::new("/tmp", Checks::DEFAULT)])
    }

    #[test]
    fn test_symbolic_mode() {
        assert_eq!(symbolic_mode(0o644), "rw-r--r--");
        assert_eq!(symbolic_mode(0o755), "rwxr-xr-x");
        assert_eq!(symbolic_mode(0o000), "---------");
        assert_eq!(symbolic_mode(0o4755), "rwsr-xr-x");
        assert_eq!(symbolic_mode(0o4644), "rwSr--r--");
        assert_eq!(symbolic_mode(0o1777), "rwxrwxrwt");
    }

    #[test]
    fn test_collect_full_mask() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(b"hello world\n").unwrap();
        drop(f);

        let meta = fs::symlink_metadata(&path).unwrap();
        let data = collect_attributes(
            path.to_str().unwrap(),
            &meta,
            Checks::DEFAULT,
            ScanMode::Scheduled,
            &test_config(),
        )
        .unwrap();

        assert_eq!(data.size, 12);
        assert_eq!(data.perm.len(), 9);
        assert_eq!(data.hash_md5, "6f5902ac237024bdd0c176cb93063dc4");
        assert!(data.inode != 0);
        assert!(data.scanned);

        // Checksum totality: the stored checksum is the SHA-1 of the
        // canonical string
        assert_eq!(data.checksum, crate::hash::sha1_hex(&data.canonical_string()));
    }

    #[test]
    fn test_collect_unset_bits_stay_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        fs::write(&path, b"content").unwrap();

        let meta = fs::symlink_metadata(&path).unwrap();
        let checks = Checks::empty().with(Checks::SIZE).with(Checks::SHA256);
        let data = collect_attributes(
            path.to_str().unwrap(),
            &meta,
            checks,
            ScanMode::Scheduled,
            &test_config(),
        )
        .unwrap();

        assert_eq!(data.size, 7);
        assert!(data.perm.is_empty());
        assert!(data.uid.is_empty());
        assert!(data.user_name.is_empty());
        assert_eq!(data.mtime, 0);
        assert!(data.hash_md5.is_empty());
        assert!(data.hash_sha1.is_empty());
        assert!(!data.hash_sha256.is_empty());
    }

    #[test]
    fn test_empty_file_keeps_empty_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();

        let meta = fs::symlink_metadata(&path).unwrap();
        let data = collect_attributes(
            path.to_str().unwrap(),
            &meta,
            Checks::DEFAULT,
            ScanMode::Scheduled,
            &test_config(),
        )
        .unwrap();

        assert_eq!(data.hash_md5, MD5_EMPTY);
        assert_eq!(data.hash_sha1, SHA1_EMPTY);
        assert_eq!(data.hash_sha256, SHA256_EMPTY);
    }

    #[test]
    fn test_oversized_file_keeps_empty_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        fs::write(&path, vec![0u8; 256]).unwrap();

        let mut config = test_config();
        config.max_file_size = 100;

        let meta = fs::symlink_metadata(&path).unwrap();
        let data = collect_attributes(
            path.to_str().unwrap(),
            &meta,
            Checks::DEFAULT,
            ScanMode::Scheduled,
            &config,
        )
        .unwrap();

        assert_eq!(data.hash_sha256, SHA256_EMPTY);
    }

    #[test]
    fn test_symlink_keeps_empty_digests() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::write(&target, b"payload").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let meta = fs::symlink_metadata(&link).unwrap();
        let data = collect_attributes(
            link.to_str().unwrap(),
            &meta,
            Checks::DEFAULT,
            ScanMode::Scheduled,
            &test_config(),
        )
        .unwrap();

        assert_eq!(data.hash_md5, MD5_EMPTY);
        assert_eq!(data.hash_sha1, SHA1_EMPTY);
    }

    #[test]
    fn test_owner_resolution() {
        // uid 0 exists on any unix system this runs on
        assert_eq!(user_name(0).as_deref(), Some("root"));
        assert!(group_name(0).is_some());
    }
}
