//! Storage abstraction for the operation history.
//!
//! This module defines the [`HistoryStore`] trait which abstracts over
//! durable backends (SQLite) and the in-memory store used in tests.

use super::types::{CommittedOperation, Snapshot};
use crate::error::TandemError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, TandemError>;

/// Append-only per-document operation log.
///
/// # Storage Model
///
/// The store keeps two kinds of data, both keyed by `(document_id, revision)`:
/// 1. **Operation log**: every committed operation, immutable once written
/// 2. **Snapshots**: periodic full content, used to shorten reconstruction
///
/// Revisions of a document start at 1 and are contiguous. Log entries are
/// never removed by the store.
pub trait HistoryStore: Send + Sync {
    /// Durably append a committed operation.
    ///
    /// Fails if `entry.revision` is not exactly one past the latest stored
    /// revision of the document, or if `(client_id, local_seq)` was already
    /// committed. Nothing is written on failure.
    fn append(&self, entry: &CommittedOperation) -> StorageResult<()>;

    /// All operations of a document with revision `> from_revision`, in
    /// revision order.
    fn get_operations(
        &self,
        document_id: &str,
        from_revision: u64,
    ) -> StorageResult<Vec<CommittedOperation>>;

    /// Operations with revision in `(from_revision, to_revision]`.
    fn get_operations_between(
        &self,
        document_id: &str,
        from_revision: u64,
        to_revision: u64,
    ) -> StorageResult<Vec<CommittedOperation>> {
        Ok(self
            .get_operations(document_id, from_revision)?
            .into_iter()
            .take_while(|entry| entry.revision <= to_revision)
            .collect())
    }

    /// Latest committed revision of a document, 0 if it has none.
    fn latest_revision(&self, document_id: &str) -> StorageResult<u64>;

    /// Look up a committed submission by its author identity.
    fn find_submission(
        &self,
        document_id: &str,
        client_id: &str,
        local_seq: u64,
    ) -> StorageResult<Option<CommittedOperation>>;

    /// Store a snapshot. Replaces any snapshot at the same revision.
    fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()>;

    /// Newest snapshot with revision `<= at_or_before`.
    fn snapshot_at_or_before(
        &self,
        document_id: &str,
        at_or_before: u64,
    ) -> StorageResult<Option<Snapshot>>;

    /// Newest snapshot of a document.
    fn latest_snapshot(&self, document_id: &str) -> StorageResult<Option<Snapshot>> {
        self.snapshot_at_or_before(document_id, u64::MAX)
    }

    /// List all documents that have history.
    fn list_documents(&self) -> StorageResult<Vec<String>>;
}
