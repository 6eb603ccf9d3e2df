//! Event construction for monitored entries
//!
//! Turns an old/new attribute pair into the structured JSON event consumed
//! by the transport. Modification events carry the list of attributes that
//! actually changed under the option mask; an empty list suppresses the
//! event entirely. Deletion events serialize the last stored attribute set.

use crate::store::EntryStore;
use crate::types::{Checks, FileData, ScanMode, WhodataEvent};
use serde_json::{json, Value};

/// What happened to the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Deleted,
    Modified,
}

impl EventKind {
    /// Wire name used in emitted events
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Deleted => "deleted",
            EventKind::Modified => "modified",
        }
    }
}

/// Inputs to [`build_event`]
pub struct EventParams<'a> {
    pub path: &'a str,
    /// Previous stored attributes; `Some` only for modifications
    pub old: Option<&'a FileData>,
    /// Current attributes (for deletions: the last stored attribute set)
    pub new: &'a FileData,
    pub kind: EventKind,
    pub mode: ScanMode,
    pub whodata: Option<&'a WhodataEvent>,
    pub diff: Option<&'a str>,
    pub tags: Option<&'a str>,
}

/// Build the JSON event for one entry change, or `None` when a
/// modification changed nothing under the option mask.
///
/// The store is consulted (under the caller's lock) to enumerate other
/// paths hard-linked to the same inode.
pub fn build_event<S: EntryStore + ?Sized>(store: &S, p: &EventParams<'_>) -> Option<Value> {
    let changed = p.old.map(|old| changed_attributes(old, p.new));
    if let Some(changed) = &changed {
        if changed.is_empty() {
            return None;
        }
    }

    let mut data = json!({
        "path": p.path,
        "version": 2.0,
        "mode": p.mode.as_str(),
        "type": p.kind.as_str(),
        "timestamp": p.new.last_event,
    });

    if let Ok(paths) = store.paths_from_inode(p.new.inode, p.new.dev) {
        if paths.len() >= 2 {
            let links: Vec<&str> = paths
                .iter()
                .map(String::as_str)
                .filter(|other| *other != p.path)
                .collect();
            data["hard_links"] = json!(links);
        }
    }

    data["attributes"] = attributes_json(p.new);

    if let Some(old) = p.old {
        data["changed_attributes"] = json!(changed.unwrap_or_default());
        data["old_attributes"] = attributes_json(old);
    }

    if let Some(w) = p.whodata {
        data["audit"] = audit_json(w);
    }

    if let Some(diff) = p.diff {
        data["content_changes"] = json!(diff);
    }

    if let Some(tags) = p.tags {
        data["tags"] = json!(tags);
    }

    Some(json!({ "type": "event", "data": data }))
}

/// Names of the attributes that differ between `old` and `new`, gated by
/// the option bits the old record was collected under.
pub fn changed_attributes(old: &FileData, new: &FileData) -> Vec<&'static str> {
    let mut changed = Vec::new();
    let opts = old.options;

    if opts.contains(Checks::SIZE) && old.size != new.size {
        changed.push("size");
    }
    if opts.contains(Checks::PERM) && old.perm != new.perm {
        changed.push("permission");
    }
    if opts.contains(Checks::OWNER) {
        if old.uid != new.uid {
            changed.push("uid");
        }
        if old.user_name != new.user_name {
            changed.push("user_name");
        }
    }
    if opts.contains(Checks::GROUP) {
        if old.gid != new.gid {
            changed.push("gid");
        }
        if old.group_name != new.group_name {
            changed.push("group_name");
        }
    }
    if opts.contains(Checks::MTIME) && old.mtime != new.mtime {
        changed.push("mtime");
    }
    if opts.contains(Checks::INODE) && old.inode != new.inode {
        changed.push("inode");
    }
    if opts.contains(Checks::MD5) && old.hash_md5 != new.hash_md5 {
        changed.push("md5");
    }
    if opts.contains(Checks::SHA1) && old.hash_sha1 != new.hash_sha1 {
        changed.push("sha1");
    }
    if opts.contains(Checks::SHA256) && old.hash_sha256 != new.hash_sha256 {
        changed.push("sha256");
    }

    changed
}

/// Serialize one attribute set, gated by its option bits
pub fn attributes_json(data: &FileData) -> Value {
    let mut attrs = json!({ "type": "file" });
    let opts = data.options;

    if opts.contains(Checks::SIZE) {
        attrs["size"] = json!(data.size);
    }
    if opts.contains(Checks::PERM) {
        attrs["perm"] = json!(data.perm);
    }
    if opts.contains(Checks::OWNER) {
        attrs["uid"] = json!(data.uid);
    }
    if opts.contains(Checks::GROUP) {
        attrs["gid"] = json!(data.gid);
    }
    if !data.user_name.is_empty() {
        attrs["user_name"] = json!(data.user_name);
    }
    if !data.group_name.is_empty() {
        attrs["group_name"] = json!(data.group_name);
    }
    if opts.contains(Checks::INODE) {
        attrs["inode"] = json!(data.inode);
    }
    if opts.contains(Checks::MTIME) {
        attrs["mtime"] = json!(data.mtime);
    }
    if opts.contains(Checks::MD5) {
        attrs["hash_md5"] = json!(data.hash_md5);
    }
    if opts.contains(Checks::SHA1) {
        attrs["hash_sha1"] = json!(data.hash_sha1);
    }
    if opts.contains(Checks::SHA256) {
        attrs["hash_sha256"] = json!(data.hash_sha256);
    }
    if !data.checksum.is_empty() {
        attrs["checksum"] = json!(data.checksum);
    }

    attrs
}

/// Serialize the whodata provenance block
pub fn audit_json(w: &WhodataEvent) -> Value {
    json!({
        "user_id": w.user_id,
        "user_name": w.user_name,
        "process_name": w.process_name,
        "process_id": w.process_id,
        "cwd": w.cwd,
        "group_id": w.group_id,
        "group_name": w.group_name,
        "audit_uid": w.audit_uid,
        "audit_name": w.audit_name,
        "effective_uid": w.effective_uid,
        "effective_name": w.effective_name,
        "parent_name": w.parent_name,
        "parent_cwd": w.parent_cwd,
        "ppid": w.ppid,
    })
}

/// Scan bracket markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanInfo {
    Start,
    End,
}

/// Build a `scan_start`/`scan_end` bracket event
pub fn scan_info_json(info: ScanInfo, timestamp: i64) -> Value {
    json!({
        "type": match info {
            ScanInfo::Start => "scan_start",
            ScanInfo::End => "scan_end",
        },
        "data": { "timestamp": timestamp },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;

    fn sample(size: u64, mtime: i64) -> FileData {
        let mut data = FileData {
            size,
            perm: "rw-r--r--".into(),
            uid: "1000".into(),
            gid: "1000".into(),
            user_name: "user".into(),
            group_name: "user".into(),
            mtime,
            inode: 4242,
            dev: 2049,
            hash_md5: crate::hash::MD5_EMPTY.into(),
            hash_sha1: crate::hash::SHA1_EMPTY.into(),
            hash_sha256: crate::hash::SHA256_EMPTY.into(),
            options: Checks::DEFAULT,
            last_event: 1700000000,
            ..FileData::default()
        };
        data.refresh_checksum();
        data
    }

    fn empty_store() -> SqliteStore {
        SqliteStore::open_in_memory(None).unwrap()
    }

    #[test]
    fn test_added_event_shape() {
        let store = empty_store();
        let new = sample(10, 1000);
        let event = build_event(
            &store,
            &EventParams {
                path: "/m/a",
                old: None,
                new: &new,
                kind: EventKind::Added,
                mode: ScanMode::Scheduled,
                whodata: None,
                diff: None,
                tags: None,
            },
        )
        .unwrap();

        assert_eq!(event["type"], "event");
        let data = &event["data"];
        assert_eq!(data["path"], "/m/a");
        assert_eq!(data["type"], "added");
        assert_eq!(data["mode"], "scheduled");
        assert_eq!(data["attributes"]["size"], 10);
        assert_eq!(data["attributes"]["type"], "file");
        assert!(data.get("changed_attributes").is_none());
        assert!(data.get("old_attributes").is_none());
    }

    #[test]
    fn test_no_diff_suppression() {
        let store = empty_store();
        let old = sample(10, 1000);
        let new = old.clone();

        let event = build_event(
            &store,
            &EventParams {
                path: "/m/a",
                old: Some(&old),
                new: &new,
                kind: EventKind::Modified,
                mode: ScanMode::Scheduled,
                whodata: None,
                diff: None,
                tags: None,
            },
        );
        assert!(event.is_none());
    }

    #[test]
    fn test_modified_event_lists_changes() {
        let store = empty_store();
        let old = sample(10, 1000);
        let new = sample(20, 2000);

        let event = build_event(
            &store,
            &EventParams {
                path: "/m/a",
                old: Some(&old),
                new: &new,
                kind: EventKind::Modified,
                mode: ScanMode::Realtime,
                whodata: None,
                diff: None,
                tags: Some("prod"),
            },
        )
        .unwrap();

        let data = &event["data"];
        let changed: Vec<&str> = data["changed_attributes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(changed.contains(&"size"));
        assert!(changed.contains(&"mtime"));
        assert_eq!(data["old_attributes"]["size"], 10);
        assert_eq!(data["attributes"]["size"], 20);
        assert_eq!(data["tags"], "prod");
        assert_eq!(data["mode"], "realtime");
    }

    #[test]
    fn test_changed_attributes_gated_by_options() {
        let mut old = sample(10, 1000);
        old.options = Checks::empty().with(Checks::MTIME);
        let new = sample(20, 2000);

        // Size changed too, but the size bit is off in the old record
        assert_eq!(changed_attributes(&old, &new), vec!["mtime"]);
    }

    #[test]
    fn test_deleted_event_uses_stored_attributes() {
        let store = empty_store();
        let stored = sample(10, 1000);

        let event = build_event(
            &store,
            &EventParams {
                path: "/m/b",
                old: None,
                new: &stored,
                kind: EventKind::Deleted,
                mode: ScanMode::Scheduled,
                whodata: None,
                diff: None,
                tags: None,
            },
        )
        .unwrap();

        assert_eq!(event["data"]["type"], "deleted");
        assert_eq!(event["data"]["attributes"]["size"], 10);
    }

    #[test]
    fn test_audit_block() {
        let store = empty_store();
        let new = sample(10, 1000);
        let whodata = WhodataEvent {
            path: "/m/a".into(),
            user_id: "1000".into(),
            user_name: "alice".into(),
            process_name: "/usr/bin/vim".into(),
            process_id: 4321,
            ..WhodataEvent::default()
        };

        let event = build_event(
            &store,
            &EventParams {
                path: "/m/a",
                old: None,
                new: &new,
                kind: EventKind::Added,
                mode: ScanMode::Whodata,
                whodata: Some(&whodata),
                diff: None,
                tags: None,
            },
        )
        .unwrap();

        let audit = &event["data"]["audit"];
        assert_eq!(audit["user_name"], "alice");
        assert_eq!(audit["process_id"], 4321);
    }

    #[test]
    fn test_scan_info_brackets() {
        let start = scan_info_json(ScanInfo::Start, 1700000000);
        assert_eq!(start["type"], "scan_start");
        assert_eq!(start["data"]["timestamp"], 1700000000);

        let end = scan_info_json(ScanInfo::End, 1700000001);
        assert_eq!(end["type"], "scan_end");
    }
}
