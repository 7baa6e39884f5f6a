//! In-memory history store for testing.
//!
//! This provides a simple in-memory implementation of [`HistoryStore`]
//! for use in unit tests and development servers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::storage::{HistoryStore, StorageResult};
use super::types::{CommittedOperation, Snapshot};
use crate::error::TandemError;

/// One document's log plus its `(client_id, local_seq) -> revision` index.
#[derive(Debug, Default)]
struct DocumentLog {
    entries: Vec<CommittedOperation>,
    by_submission: HashMap<(String, u64), u64>,
}

/// In-memory operation history.
///
/// Thread-safe via `RwLock`, but data is lost when dropped. Appends can be
/// made to fail on demand with [`MemoryHistory::fail_next_appends`].
#[derive(Debug, Default)]
pub struct MemoryHistory {
    /// Operation logs (document_id -> entries in revision order)
    logs: Arc<RwLock<HashMap<String, DocumentLog>>>,

    /// Snapshots (document_id -> revision -> snapshot)
    snapshots: Arc<RwLock<HashMap<String, BTreeMap<u64, Snapshot>>>>,

    /// Number of upcoming appends that should fail
    failing_appends: AtomicUsize,
}

impl MemoryHistory {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with a storage failure.
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl HistoryStore for MemoryHistory {
    fn append(&self, entry: &CommittedOperation) -> StorageResult<()> {
        if self.take_injected_failure() {
            return Err(TandemError::StorageFailure(format!(
                "injected append failure for '{}' at revision {}",
                entry.document_id(),
                entry.revision
            )));
        }

        let mut logs = self.logs.write().unwrap();
        let log = logs.entry(entry.document_id().to_string()).or_default();

        let latest = log.entries.last().map(|e| e.revision).unwrap_or(0);
        if entry.revision != latest + 1 {
            return Err(TandemError::StorageFailure(format!(
                "revision {} does not follow {} for '{}'",
                entry.revision,
                latest,
                entry.document_id()
            )));
        }

        let op = &entry.operation;
        let key = (op.client_id.clone(), op.local_seq);
        if log.by_submission.contains_key(&key) {
            return Err(TandemError::StorageFailure(format!(
                "submission ({}, {}) already committed",
                op.client_id, op.local_seq
            )));
        }

        log.by_submission.insert(key, entry.revision);
        log.entries.push(entry.clone());
        Ok(())
    }

    fn get_operations(
        &self,
        document_id: &str,
        from_revision: u64,
    ) -> StorageResult<Vec<CommittedOperation>> {
        let logs = self.logs.read().unwrap();
        let log = logs
            .get(document_id)
            .map(|l| l.entries.as_slice())
            .unwrap_or(&[]);

        // Revisions are contiguous from 1, so index == revision - 1.
        let start = usize::try_from(from_revision).unwrap_or(usize::MAX);
        Ok(log.get(start..).map(|tail| tail.to_vec()).unwrap_or_default())
    }

    fn latest_revision(&self, document_id: &str) -> StorageResult<u64> {
        let logs = self.logs.read().unwrap();
        Ok(logs
            .get(document_id)
            .and_then(|l| l.entries.last())
            .map(|e| e.revision)
            .unwrap_or(0))
    }

    fn find_submission(
        &self,
        document_id: &str,
        client_id: &str,
        local_seq: u64,
    ) -> StorageResult<Option<CommittedOperation>> {
        let logs = self.logs.read().unwrap();
        Ok(logs.get(document_id).and_then(|log| {
            let revision = *log.by_submission.get(&(client_id.to_string(), local_seq))?;
            // Revisions are contiguous from 1.
            log.entries
                .get(usize::try_from(revision).ok()?.checked_sub(1)?)
                .cloned()
        }))
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut snapshots = self.snapshots.write().unwrap();
        snapshots
            .entry(snapshot.document_id.clone())
            .or_default()
            .insert(snapshot.revision, snapshot.clone());
        Ok(())
    }

    fn snapshot_at_or_before(
        &self,
        document_id: &str,
        at_or_before: u64,
    ) -> StorageResult<Option<Snapshot>> {
        let snapshots = self.snapshots.read().unwrap();
        Ok(snapshots.get(document_id).and_then(|by_revision| {
            by_revision
                .range(..=at_or_before)
                .next_back()
                .map(|(_, s)| s.clone())
        }))
    }

    fn list_documents(&self) -> StorageResult<Vec<String>> {
        let logs = self.logs.read().unwrap();
        Ok(logs.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::{Component, Operation};

    fn entry(doc: &str, revision: u64, client: &str, seq: u64) -> CommittedOperation {
        CommittedOperation::new(
            revision,
            Operation::new(doc, client, seq, revision - 1, vec![Component::insert(0, "x")]),
        )
    }

    #[test]
    fn test_append_and_get_operations() {
        let storage = MemoryHistory::new();
        storage.append(&entry("doc", 1, "alice", 1)).unwrap();
        storage.append(&entry("doc", 2, "bob", 1)).unwrap();
        storage.append(&entry("doc", 3, "alice", 2)).unwrap();

        let all = storage.get_operations("doc", 0).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].operation.client_id, "bob");

        let since = storage.get_operations("doc", 1).unwrap();
        assert_eq!(
            since.iter().map(|e| e.revision).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(storage.get_operations("doc", 3).unwrap().is_empty());
        assert!(storage.get_operations("doc", 99).unwrap().is_empty());
        assert_eq!(storage.get_operations_between("doc", 0, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_rejects_non_contiguous_revision() {
        let storage = MemoryHistory::new();
        storage.append(&entry("doc", 1, "alice", 1)).unwrap();

        assert!(storage.append(&entry("doc", 3, "alice", 2)).is_err());
        assert!(storage.append(&entry("doc", 1, "alice", 2)).is_err());
        assert_eq!(storage.latest_revision("doc").unwrap(), 1);
    }

    #[test]
    fn test_rejects_duplicate_submission() {
        let storage = MemoryHistory::new();
        storage.append(&entry("doc", 1, "alice", 1)).unwrap();
        assert!(storage.append(&entry("doc", 2, "alice", 1)).is_err());

        let found = storage.find_submission("doc", "alice", 1).unwrap();
        assert_eq!(found.map(|e| e.revision), Some(1));
        assert!(storage.find_submission("doc", "alice", 2).unwrap().is_none());
    }

    #[test]
    fn test_find_submission_uses_index_across_long_log() {
        let storage = MemoryHistory::new();
        for revision in 1..=500u64 {
            let client = if revision % 2 == 0 { "alice" } else { "bob" };
            storage.append(&entry("doc", revision, client, revision)).unwrap();
        }

        let found = storage.find_submission("doc", "alice", 250).unwrap().unwrap();
        assert_eq!(found.revision, 250);
        assert_eq!(found.operation.client_id, "alice");
        assert!(storage.find_submission("doc", "alice", 251).unwrap().is_none());
        assert!(storage.find_submission("other", "alice", 250).unwrap().is_none());

        // A rejected append leaves the index untouched.
        assert!(storage.append(&entry("doc", 502, "carol", 1)).is_err());
        assert!(storage.find_submission("doc", "carol", 1).unwrap().is_none());
    }

    #[test]
    fn test_injected_failures_write_nothing() {
        let storage = MemoryHistory::new();
        storage.fail_next_appends(1);

        assert!(matches!(
            storage.append(&entry("doc", 1, "alice", 1)),
            Err(TandemError::StorageFailure(_))
        ));
        assert_eq!(storage.latest_revision("doc").unwrap(), 0);

        storage.append(&entry("doc", 1, "alice", 1)).unwrap();
        assert_eq!(storage.latest_revision("doc").unwrap(), 1);
    }

    #[test]
    fn test_snapshots_by_revision() {
        let storage = MemoryHistory::new();
        storage.save_snapshot(&Snapshot::new("doc", 10, "ten")).unwrap();
        storage.save_snapshot(&Snapshot::new("doc", 20, "twenty")).unwrap();

        let snap = storage.snapshot_at_or_before("doc", 15).unwrap().unwrap();
        assert_eq!(snap.content, "ten");
        assert!(storage.snapshot_at_or_before("doc", 5).unwrap().is_none());
        assert_eq!(storage.latest_snapshot("doc").unwrap().unwrap().revision, 20);
    }

    #[test]
    fn test_list_documents() {
        let storage = MemoryHistory::new();
        storage.append(&entry("doc1", 1, "alice", 1)).unwrap();
        storage.append(&entry("doc2", 1, "alice", 1)).unwrap();

        let mut docs = storage.list_documents().unwrap();
        docs.sort();
        assert_eq!(docs, vec!["doc1", "doc2"]);
    }
}
