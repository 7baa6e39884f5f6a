//! SQLite-backed operation history.
//!
//! This module provides the durable storage backend: committed operations
//! and snapshots live in a single SQLite database.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::storage::{HistoryStore, StorageResult};
use super::types::{CommittedOperation, Snapshot};
use crate::error::TandemError;
use crate::ot::Operation;

/// SQLite-backed operation history.
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex` for thread-safe access.
/// SQLite itself is used in serialized threading mode.
pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    /// Open or create a SQLite database at the given path.
    ///
    /// This will create the necessary tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database for testing.
    ///
    /// Data is lost when the storage is dropped.
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            -- Committed operations, immutable once written
            CREATE TABLE IF NOT EXISTS operations (
                document_id TEXT NOT NULL,
                revision INTEGER NOT NULL,
                client_id TEXT NOT NULL,
                local_seq INTEGER NOT NULL,
                operation TEXT NOT NULL,
                committed_at INTEGER NOT NULL,
                clamped INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (document_id, revision)
            );

            -- Idempotent resubmission lookups
            CREATE UNIQUE INDEX IF NOT EXISTS idx_operations_submission
                ON operations(document_id, client_id, local_seq);

            -- Periodic content snapshots
            CREATE TABLE IF NOT EXISTS snapshots (
                document_id TEXT NOT NULL,
                revision INTEGER NOT NULL,
                content TEXT NOT NULL,
                checksum TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (document_id, revision)
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TandemError::StorageFailure("history connection poisoned".to_string()))
    }
}

/// SQLite stores integers as i64; revisions never get near the limit.
fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Columns of an `operations` row, before the operation JSON is decoded.
type OperationRow = (i64, String, i64, bool);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OperationRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn row_to_entry((revision, operation, committed_at, clamped): OperationRow) -> StorageResult<CommittedOperation> {
    let operation: Operation = serde_json::from_str(&operation)?;
    Ok(CommittedOperation {
        revision: revision as u64,
        operation,
        committed_at,
        clamped,
    })
}

impl HistoryStore for SqliteHistory {
    fn append(&self, entry: &CommittedOperation) -> StorageResult<()> {
        let payload = serde_json::to_string(&entry.operation)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let latest: i64 = tx.query_row(
            "SELECT COALESCE(MAX(revision), 0) FROM operations WHERE document_id = ?",
            params![entry.document_id()],
            |row| row.get(0),
        )?;
        if to_sql(entry.revision) != latest + 1 {
            return Err(TandemError::StorageFailure(format!(
                "revision {} does not follow {} for '{}'",
                entry.revision,
                latest,
                entry.document_id()
            )));
        }

        tx.execute(
            "INSERT INTO operations (document_id, revision, client_id, local_seq, operation, committed_at, clamped)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.document_id(),
                to_sql(entry.revision),
                entry.operation.client_id,
                to_sql(entry.operation.local_seq),
                payload,
                entry.committed_at,
                entry.clamped,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_operations(
        &self,
        document_id: &str,
        from_revision: u64,
    ) -> StorageResult<Vec<CommittedOperation>> {
        self.get_operations_between(document_id, from_revision, u64::MAX)
    }

    fn get_operations_between(
        &self,
        document_id: &str,
        from_revision: u64,
        to_revision: u64,
    ) -> StorageResult<Vec<CommittedOperation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT revision, operation, committed_at, clamped FROM operations
             WHERE document_id = ? AND revision > ? AND revision <= ?
             ORDER BY revision ASC",
        )?;
        let rows = stmt
            .query_map(
                params![document_id, to_sql(from_revision), to_sql(to_revision)],
                read_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(row_to_entry).collect()
    }

    fn latest_revision(&self, document_id: &str) -> StorageResult<u64> {
        let conn = self.lock()?;
        let latest: i64 = conn.query_row(
            "SELECT COALESCE(MAX(revision), 0) FROM operations WHERE document_id = ?",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(latest as u64)
    }

    fn find_submission(
        &self,
        document_id: &str,
        client_id: &str,
        local_seq: u64,
    ) -> StorageResult<Option<CommittedOperation>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT revision, operation, committed_at, clamped FROM operations
                 WHERE document_id = ? AND client_id = ? AND local_seq = ?",
                params![document_id, client_id, to_sql(local_seq)],
                read_row,
            )
            .optional()?;

        row.map(row_to_entry).transpose()
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO snapshots (document_id, revision, content, checksum, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                snapshot.document_id,
                to_sql(snapshot.revision),
                snapshot.content,
                snapshot.checksum,
                snapshot.created_at,
            ],
        )?;
        Ok(())
    }

    fn snapshot_at_or_before(
        &self,
        document_id: &str,
        at_or_before: u64,
    ) -> StorageResult<Option<Snapshot>> {
        let conn = self.lock()?;
        let snapshot = conn
            .query_row(
                "SELECT revision, content, checksum, created_at FROM snapshots
                 WHERE document_id = ? AND revision <= ?
                 ORDER BY revision DESC LIMIT 1",
                params![document_id, to_sql(at_or_before)],
                |row| {
                    Ok(Snapshot {
                        document_id: document_id.to_string(),
                        revision: row.get::<_, i64>(0)? as u64,
                        content: row.get(1)?,
                        checksum: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    fn list_documents(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT document_id FROM operations ORDER BY document_id")?;
        let docs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::reconstruct;
    use crate::ot::Component;
    use tempfile::tempdir;

    fn entry(revision: u64, client: &str, seq: u64, components: Vec<Component>) -> CommittedOperation {
        CommittedOperation::new(
            revision,
            Operation::new("doc", client, seq, revision - 1, components),
        )
    }

    #[test]
    fn test_sqlite_append_and_get_operations() {
        let storage = SqliteHistory::in_memory().unwrap();
        storage.append(&entry(1, "alice", 1, vec![Component::insert(0, "Hello")])).unwrap();
        storage.append(&entry(2, "bob", 1, vec![Component::insert(5, "!")])).unwrap();

        let all = storage.get_operations("doc", 0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].operation.components, vec![Component::insert(0, "Hello")]);

        let since = storage.get_operations("doc", 1).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].operation.client_id, "bob");
        assert_eq!(storage.latest_revision("doc").unwrap(), 2);
        assert_eq!(storage.latest_revision("other").unwrap(), 0);
    }

    #[test]
    fn test_sqlite_rejects_gaps_and_duplicates() {
        let storage = SqliteHistory::in_memory().unwrap();
        storage.append(&entry(1, "alice", 1, vec![Component::insert(0, "a")])).unwrap();

        assert!(storage.append(&entry(3, "alice", 2, vec![Component::insert(0, "b")])).is_err());
        assert!(storage.append(&entry(2, "alice", 1, vec![Component::insert(0, "b")])).is_err());
        assert_eq!(storage.latest_revision("doc").unwrap(), 1);

        let found = storage.find_submission("doc", "alice", 1).unwrap().unwrap();
        assert_eq!(found.revision, 1);
        assert!(storage.find_submission("doc", "bob", 1).unwrap().is_none());
    }

    #[test]
    fn test_sqlite_keeps_clamped_flag() {
        let storage = SqliteHistory::in_memory().unwrap();
        storage.append(&entry(1, "alice", 1, vec![Component::insert(0, "ab")])).unwrap();
        storage
            .append(&entry(2, "bob", 1, vec![Component::delete(0, 1)]).with_clamped(true))
            .unwrap();

        assert!(!storage.find_submission("doc", "alice", 1).unwrap().unwrap().clamped);
        assert!(storage.find_submission("doc", "bob", 1).unwrap().unwrap().clamped);
        let flags: Vec<bool> = storage
            .get_operations("doc", 0)
            .unwrap()
            .iter()
            .map(|e| e.clamped)
            .collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn test_sqlite_snapshots() {
        let storage = SqliteHistory::in_memory().unwrap();
        storage.save_snapshot(&Snapshot::new("doc", 2, "two")).unwrap();
        storage.save_snapshot(&Snapshot::new("doc", 4, "four")).unwrap();

        assert_eq!(
            storage.snapshot_at_or_before("doc", 3).unwrap().unwrap().content,
            "two"
        );
        assert_eq!(storage.latest_snapshot("doc").unwrap().unwrap().revision, 4);
        assert!(storage.snapshot_at_or_before("doc", 1).unwrap().is_none());
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.db");

        {
            let storage = SqliteHistory::open(&path).unwrap();
            storage.append(&entry(1, "alice", 1, vec![Component::insert(0, "Hello")])).unwrap();
            storage.append(&entry(2, "alice", 2, vec![Component::delete(0, 1)])).unwrap();
        }

        let storage = SqliteHistory::open(&path).unwrap();
        assert_eq!(storage.list_documents().unwrap(), vec!["doc".to_string()]);
        assert_eq!(
            reconstruct(&storage, "doc", None).unwrap(),
            ("ello".to_string(), 2)
        );
    }
}
