//! Durable, append-only operation history.
//!
//! Committed operations are keyed by `(document_id, revision)`. Content at
//! any revision is rebuilt from the nearest snapshot at or before it plus the
//! log entries that follow.

mod memory_storage;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
mod sqlite_storage;
mod storage;
mod types;

pub use memory_storage::MemoryHistory;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub use sqlite_storage::SqliteHistory;
pub use storage::{HistoryStore, StorageResult};
pub use types::{CommittedOperation, Snapshot, content_checksum};

use crate::error::TandemError;
use crate::ot::apply_exact;

/// Replay committed entries on top of `content`, checking contiguity.
pub fn replay(
    document_id: &str,
    mut content: String,
    mut revision: u64,
    entries: &[CommittedOperation],
) -> StorageResult<(String, u64)> {
    for entry in entries {
        if entry.revision != revision + 1 {
            return Err(TandemError::CorruptHistory {
                document_id: document_id.to_string(),
                revision: entry.revision,
                reason: format!("expected revision {}", revision + 1),
            });
        }
        content = apply_exact(&content, &entry.operation.components).ok_or_else(|| {
            TandemError::CorruptHistory {
                document_id: document_id.to_string(),
                revision: entry.revision,
                reason: "operation out of range for reconstructed content".to_string(),
            }
        })?;
        revision = entry.revision;
    }
    Ok((content, revision))
}

/// Rebuild a document's content at `revision` (or the latest if `None`).
///
/// Returns the content together with the revision actually reached, which is
/// lower than requested if the log ends earlier.
pub fn reconstruct(
    store: &dyn HistoryStore,
    document_id: &str,
    revision: Option<u64>,
) -> StorageResult<(String, u64)> {
    let target = revision.unwrap_or(u64::MAX);
    let (content, from) = match store.snapshot_at_or_before(document_id, target)? {
        Some(snapshot) => (snapshot.content, snapshot.revision),
        None => (String::new(), 0),
    };
    let tail = store.get_operations_between(document_id, from, target)?;
    replay(document_id, content, from, &tail)
}
