//! SQLite-backed entry store
//!
//! One row per monitored path, with an (inode, dev) index for collision
//! probes and hard-link enumeration, and a `scanned` flag column driving
//! the end-of-scan deletion sweep. The engine serializes access through its
//! entry lock, so the connection is used single-threaded.

use crate::error::{StoreError, StoreResult};
use crate::store::EntryStore;
use crate::types::{Checks, FileData, FileEntry, ScanMode};
use rusqlite::{params, Connection, Row};
use std::path::Path;

/// SQL to create the entries table
const CREATE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    path TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    perm TEXT NOT NULL,
    attributes TEXT NOT NULL,
    uid TEXT NOT NULL,
    gid TEXT NOT NULL,
    user_name TEXT NOT NULL,
    group_name TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    inode INTEGER NOT NULL,
    dev INTEGER NOT NULL,
    hash_md5 TEXT NOT NULL,
    hash_sha1 TEXT NOT NULL,
    hash_sha256 TEXT NOT NULL,
    checksum TEXT NOT NULL,
    options INTEGER NOT NULL,
    mode INTEGER NOT NULL,
    last_event INTEGER NOT NULL,
    scanned INTEGER NOT NULL DEFAULT 1
)
"#;

/// Secondary indexes: identity probes and the unscanned sweep
const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_entries_inode ON entries(inode, dev)",
    "CREATE INDEX IF NOT EXISTS idx_entries_scanned ON entries(scanned)",
];

/// Pragmas for a write-heavy single-connection workload
const WRITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
PRAGMA cache_size = -16000;
"#;

const SELECT_COLUMNS: &str = "path, size, perm, attributes, uid, gid, user_name, group_name, \
     mtime, inode, dev, hash_md5, hash_sha1, hash_sha256, checksum, options, mode, \
     last_event, scanned";

/// SQLite-backed [`EntryStore`]
pub struct SqliteStore {
    conn: Connection,
    file_limit: Option<usize>,
    full: bool,
}

impl SqliteStore {
    /// Open (or create) a store at `path`. `file_limit` enables the
    /// capacity latch.
    pub fn open<P: AsRef<Path>>(path: P, file_limit: Option<usize>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, file_limit)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory(file_limit: Option<usize>) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, file_limit)
    }

    fn init(conn: Connection, file_limit: Option<usize>) -> StoreResult<Self> {
        conn.execute_batch(WRITE_PRAGMAS)?;
        conn.execute(CREATE_ENTRIES_TABLE, [])?;
        for sql in CREATE_INDEXES {
            conn.execute(sql, [])?;
        }
        Ok(Self {
            conn,
            file_limit,
            full: false,
        })
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<FileEntry> {
        Ok(FileEntry {
            path: row.get(0)?,
            data: FileData {
                size: row.get::<_, i64>(1)? as u64,
                perm: row.get(2)?,
                attributes: row.get(3)?,
                uid: row.get(4)?,
                gid: row.get(5)?,
                user_name: row.get(6)?,
                group_name: row.get(7)?,
                mtime: row.get(8)?,
                inode: row.get::<_, i64>(9)? as u64,
                dev: row.get::<_, i64>(10)? as u64,
                hash_md5: row.get(11)?,
                hash_sha1: row.get(12)?,
                hash_sha256: row.get(13)?,
                checksum: row.get(14)?,
                options: Checks(row.get::<_, i64>(15)? as u32),
                mode: ScanMode::from_u8(row.get::<_, i64>(16)? as u8),
                last_event: row.get(17)?,
                scanned: row.get::<_, i64>(18)? != 0,
            },
        })
    }
}

impl EntryStore for SqliteStore {
    fn get(&self, path: &str) -> StoreResult<Option<FileEntry>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM entries WHERE path = ?1"
        ))?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_entry(row)?)),
            None => Ok(None),
        }
    }

    fn insert(&mut self, path: &str, data: &FileData, old: Option<&FileData>) -> StoreResult<()> {
        if let Some(limit) = self.file_limit {
            if old.is_none() && self.count()? >= limit {
                self.full = true;
                return Err(StoreError::Full);
            }
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO entries (path, size, perm, attributes, uid, gid, \
             user_name, group_name, mtime, inode, dev, hash_md5, hash_sha1, hash_sha256, \
             checksum, options, mode, last_event, scanned) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
             ?16, ?17, ?18, ?19)",
            params![
                path,
                data.size as i64,
                data.perm,
                data.attributes,
                data.uid,
                data.gid,
                data.user_name,
                data.group_name,
                data.mtime,
                data.inode as i64,
                data.dev as i64,
                data.hash_md5,
                data.hash_sha1,
                data.hash_sha256,
                data.checksum,
                data.options.0 as i64,
                data.mode.as_db_int(),
                data.last_event,
                data.scanned as i64,
            ],
        )?;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> StoreResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM entries WHERE path = ?1", params![path])?;
        if removed > 0 {
            // Space freed: new paths are admissible again
            self.full = false;
        }
        Ok(removed > 0)
    }

    fn data_exists(&self, inode: u64, dev: u64) -> StoreResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM entries WHERE inode = ?1 AND dev = ?2)",
            params![inode as i64, dev as i64],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    fn paths_from_inode(&self, inode: u64, dev: u64) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path FROM entries WHERE inode = ?1 AND dev = ?2 ORDER BY path")?;
        let paths = stmt
            .query_map(params![inode as i64, dev as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    fn paths_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path FROM entries WHERE path LIKE ?1 ORDER BY path")?;
        let paths = stmt
            .query_map(params![pattern], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    fn set_all_unscanned(&mut self) -> StoreResult<()> {
        self.conn.execute("UPDATE entries SET scanned = 0", [])?;
        Ok(())
    }

    fn is_scanned(&self, path: &str) -> StoreResult<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT scanned FROM entries WHERE path = ?1")?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => Ok(row.get::<_, i64>(0)? != 0),
            None => Ok(false),
        }
    }

    fn set_scanned(&mut self, path: &str) -> StoreResult<()> {
        self.conn
            .execute("UPDATE entries SET scanned = 1 WHERE path = ?1", params![path])?;
        Ok(())
    }

    fn not_scanned(&self) -> StoreResult<Vec<FileEntry>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM entries WHERE scanned = 0 ORDER BY path"
        ))?;
        let entries = stmt
            .query_map([], Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn is_full(&self) -> bool {
        self.full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(inode: u64) -> FileData {
        let mut data = FileData {
            size: 100,
            perm: "rw-r--r--".into(),
            uid: "0".into(),
            gid: "0".into(),
            user_name: "root".into(),
            group_name: "root".into(),
            mtime: 1700000000,
            inode,
            dev: 2049,
            options: Checks::DEFAULT,
            last_event: 1700000000,
            ..FileData::default()
        };
        data.refresh_checksum();
        data
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        let data = sample(100);

        store.insert("/m/a", &data, None).unwrap();
        let entry = store.get("/m/a").unwrap().unwrap();
        assert_eq!(entry.path, "/m/a");
        assert_eq!(entry.data, data);

        assert!(store.get("/m/missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces() {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        let old = sample(100);
        store.insert("/m/a", &old, None).unwrap();

        let mut new = sample(100);
        new.size = 222;
        new.refresh_checksum();
        store.insert("/m/a", &new, Some(&old)).unwrap();

        let entry = store.get("/m/a").unwrap().unwrap();
        assert_eq!(entry.data.size, 222);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_remove() {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        store.insert("/m/a", &sample(100), None).unwrap();

        assert!(store.remove("/m/a").unwrap());
        assert!(!store.remove("/m/a").unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_inode_index() {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        store.insert("/m/a", &sample(100), None).unwrap();
        store.insert("/m/b", &sample(100), None).unwrap();
        store.insert("/m/c", &sample(200), None).unwrap();

        assert!(store.data_exists(100, 2049).unwrap());
        assert!(!store.data_exists(999, 2049).unwrap());
        assert!(!store.data_exists(100, 1).unwrap());

        let paths = store.paths_from_inode(100, 2049).unwrap();
        assert_eq!(paths, vec!["/m/a".to_string(), "/m/b".to_string()]);
    }

    #[test]
    fn test_prefix_pattern() {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        store.insert("/m/sub/a", &sample(1), None).unwrap();
        store.insert("/m/sub/b", &sample(2), None).unwrap();
        store.insert("/m/other", &sample(3), None).unwrap();

        let paths = store.paths_matching("/m/sub/%").unwrap();
        assert_eq!(paths, vec!["/m/sub/a".to_string(), "/m/sub/b".to_string()]);
    }

    #[test]
    fn test_scanned_cycle() {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        store.insert("/m/a", &sample(100), None).unwrap();
        store.insert("/m/b", &sample(200), None).unwrap();

        assert!(store.is_scanned("/m/a").unwrap());
        assert!(!store.is_scanned("/m/unknown").unwrap());

        store.set_all_unscanned().unwrap();
        assert!(!store.is_scanned("/m/a").unwrap());

        store.set_scanned("/m/a").unwrap();
        assert!(store.is_scanned("/m/a").unwrap());

        let stale = store.not_scanned().unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].path, "/m/b");
    }

    #[test]
    fn test_capacity_latch() {
        let mut store = SqliteStore::open_in_memory(Some(2)).unwrap();
        store.insert("/m/a", &sample(1), None).unwrap();
        store.insert("/m/b", &sample(2), None).unwrap();
        assert!(!store.is_full());

        let err = store.insert("/m/c", &sample(3), None).unwrap_err();
        assert!(matches!(err, StoreError::Full));
        assert!(store.is_full());

        // Updates to existing paths still go through at capacity
        let old = store.get("/m/a").unwrap().unwrap().data;
        store.insert("/m/a", &sample(1), Some(&old)).unwrap();

        // Removal frees space and clears the latch
        store.remove("/m/a").unwrap();
        assert!(!store.is_full());
        store.insert("/m/c", &sample(3), None).unwrap();
    }
}
