//! SQLite-backed [`KvStore`].
//!
//! A single connection guarded by a mutex; every operation runs as one
//! statement or one transaction, so single-key atomicity follows from the
//! mutex plus SQLite's own transactional guarantees.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;

use super::encoding::{self, prefix_range};
use super::schema;
use super::{Check, Commit, Entry, Key, KvStore, ListOptions, Versionstamp};
use crate::error::Result;

/// Durable store in a single SQLite file.
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        // WAL keeps readers and the single writer from blocking each other
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::init_schema(&conn)?;

        tracing::info!(path = %path.display(), "kv store opened");

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

}

fn row_to_entry(key: Key, value: &str, versionstamp: i64) -> Result<Entry> {
    Ok(Entry {
        key,
        value: serde_json::from_str(value)?,
        versionstamp: Versionstamp(versionstamp as u64),
    })
}

impl KvStore for SqliteStore {
    fn get(&self, key: &Key) -> Result<Option<Entry>> {
        let encoded = encoding::encode(key);
        let now = super::now_millis();
        let conn = self.conn.lock();

        let row: Option<(String, i64, Option<i64>)> = conn
            .query_row(
                "SELECT value, versionstamp, expires_at FROM kv_entries WHERE key = ?1",
                params![encoded],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((_, _, Some(expires_at))) if expires_at <= now => {
                conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![encoded])?;
                Ok(None)
            }
            Some((value, versionstamp, _)) => {
                row_to_entry(key.clone(), &value, versionstamp).map(Some)
            }
            None => Ok(None),
        }
    }

    fn compare_and_set(
        &self,
        key: &Key,
        check: Check,
        value: Value,
        expire_in: Option<Duration>,
    ) -> Result<Commit> {
        let encoded = encoding::encode(key);
        let serialized = serde_json::to_string(&value)?;
        let now = super::now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(i64, Option<i64>)> = tx
            .query_row(
                "SELECT versionstamp, expires_at FROM kv_entries WHERE key = ?1",
                params![encoded],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let current = current
            .filter(|(_, expires_at)| expires_at.is_none_or(|at| at > now))
            .map(|(v, _)| Versionstamp(v as u64));

        if !check.holds(current) {
            // Dropping the transaction rolls it back.
            return Ok(Commit::Conflict);
        }

        let next: i64 = tx.query_row(
            "UPDATE kv_sequence SET value = value + 1 WHERE id = 1 RETURNING value",
            [],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO kv_entries (key, value, versionstamp, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                versionstamp = excluded.versionstamp,
                expires_at = excluded.expires_at",
            params![encoded, serialized, next, super::expiry_millis(expire_in)],
        )?;
        tx.commit()?;

        Ok(Commit::Committed(Versionstamp(next as u64)))
    }

    fn list_prefix(&self, prefix: &Key, options: ListOptions) -> Result<Vec<Entry>> {
        let (start, end) = prefix_range(prefix);
        let now = super::now_millis();
        let order = if options.reverse { "DESC" } else { "ASC" };
        let limit = options
            .limit
            .map(|l| l.min(i64::MAX as usize) as i64)
            .unwrap_or(-1);

        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM kv_entries
             WHERE key > ?1 AND key < ?2
               AND expires_at IS NOT NULL AND expires_at <= ?3",
            params![start, end, now],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT key, value, versionstamp FROM kv_entries
             WHERE key > ?1 AND key < ?2
               AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY key {order}
             LIMIT ?4"
        ))?;

        let rows = stmt.query_map(params![start, end, now, limit], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (raw_key, value, versionstamp) = row?;
            entries.push(row_to_entry(encoding::decode(&raw_key)?, &value, versionstamp)?);
        }

        Ok(entries)
    }

    fn delete(&self, key: &Key) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM kv_entries WHERE key = ?1",
            params![encoding::encode(key)],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<u64> {
        let now = super::now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let live: i64 = tx.query_row(
            "SELECT COUNT(*) FROM kv_entries WHERE expires_at IS NULL OR expires_at > ?1",
            params![now],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM kv_entries", [])?;
        tx.commit()?;
        Ok(live as u64)
    }

    fn purge_expired(&self) -> Result<u64> {
        let now = super::now_millis();
        let removed = self.conn.lock().execute(
            "DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        if removed > 0 {
            tracing::debug!(removed, "purged expired kv entries");
        }
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    #[test]
    fn test_open_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.path(), Path::new(":memory:"));
        assert!(store.get(&key!["missing"]).unwrap().is_none());
    }

    #[test]
    fn test_compare_and_set_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let k = key!["click_counts", "menu:home"];

        let commit = store
            .compare_and_set(&k, Check::Absent, Value::from(1), None)
            .unwrap();
        let Commit::Committed(v1) = commit else {
            panic!("expected commit");
        };

        let entry = store.get(&k).unwrap().unwrap();
        assert_eq!(entry.value, Value::from(1));
        assert_eq!(entry.versionstamp, v1);

        // Second insert-if-absent loses
        assert_eq!(
            store
                .compare_and_set(&k, Check::Absent, Value::from(9), None)
                .unwrap(),
            Commit::Conflict
        );

        // Versioned write wins once, then the old version is stale
        let commit = store
            .compare_and_set(&k, Check::Version(v1), Value::from(2), None)
            .unwrap();
        assert!(commit.is_committed());
        assert_eq!(
            store
                .compare_and_set(&k, Check::Version(v1), Value::from(3), None)
                .unwrap(),
            Commit::Conflict
        );
        assert_eq!(store.get(&k).unwrap().unwrap().value, Value::from(2));
    }

    #[test]
    fn test_list_prefix_matches_key_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for t in [300i64, -7, 42] {
            store
                .set(&key!["click_events", t], Value::from(t), None)
                .unwrap();
        }
        store.set(&key!["click_eventz", 1i64], Value::from(0), None).unwrap();

        let asc = store
            .list_prefix(&key!["click_events"], ListOptions::default())
            .unwrap();
        let values: Vec<_> = asc.iter().map(|e| e.value.as_i64().unwrap()).collect();
        assert_eq!(values, vec![-7, 42, 300]);

        let desc = store
            .list_prefix(&key!["click_events"], ListOptions::latest(2))
            .unwrap();
        let values: Vec<_> = desc.iter().map(|e| e.value.as_i64().unwrap()).collect();
        assert_eq!(values, vec![300, 42]);
        assert_eq!(desc[0].key, key!["click_events", 300i64]);
    }

    #[test]
    fn test_expiry_and_purge() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set(&key!["ttl", "gone"], Value::from(1), Some(Duration::from_millis(0)))
            .unwrap();
        store
            .set(&key!["ttl", "kept"], Value::from(2), Some(Duration::from_secs(3600)))
            .unwrap();

        std::thread::sleep(Duration::from_millis(5));

        assert!(store.get(&key!["ttl", "gone"]).unwrap().is_none());
        let listed = store.list_prefix(&key!["ttl"], ListOptions::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(store.purge_expired().unwrap(), 0);
        assert!(store.get(&key!["ttl", "kept"]).unwrap().is_some());
    }

    #[test]
    fn test_listing_reclaims_expired_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..100i64 {
            store
                .set(&key!["click_events", i], Value::from(i), Some(Duration::ZERO))
                .unwrap();
        }
        store
            .set(&key!["other", "gone"], Value::Null, Some(Duration::ZERO))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let raw_rows = |store: &SqliteStore| -> i64 {
            store
                .conn
                .lock()
                .query_row("SELECT COUNT(*) FROM kv_entries", [], |row| row.get(0))
                .unwrap()
        };
        assert_eq!(raw_rows(&store), 101);

        let listed = store
            .list_prefix(&key!["click_events"], ListOptions::latest(20))
            .unwrap();
        assert!(listed.is_empty());
        assert_eq!(raw_rows(&store), 1);

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(raw_rows(&store), 0);
    }

    #[test]
    fn test_clear_counts_live_entries() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set(&key!["a"], Value::from(1), None).unwrap();
        store.set(&key!["b"], Value::from(2), None).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list_prefix(&key![], ListOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("folio.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .set(&key!["likes", "memoato"], Value::from(3), None)
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let entry = store.get(&key!["likes", "memoato"]).unwrap().unwrap();
        assert_eq!(entry.value, Value::from(3));

        // Versionstamps keep increasing after reopen
        let Commit::Committed(next) = store.set(&key!["x"], Value::Null, None).unwrap() else {
            panic!("expected commit");
        };
        assert!(next > entry.versionstamp);
    }
}
