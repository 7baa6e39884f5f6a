//! Records persisted by the operation history store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ot::Operation;

/// An operation committed at a server revision.
///
/// The stored operation is the transformed one: it applies directly on top
/// of revision `revision - 1`, and its `base_revision` says so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedOperation {
    /// Server revision this operation produced
    pub revision: u64,
    /// The transformed operation as applied
    pub operation: Operation,
    /// Unix timestamp of the commit (milliseconds)
    pub committed_at: i64,
    /// Bounds were clamped when this operation was applied
    #[serde(default)]
    pub clamped: bool,
}

impl CommittedOperation {
    /// Create a committed entry stamped with the current time.
    pub fn new(revision: u64, operation: Operation) -> Self {
        Self {
            revision,
            operation,
            committed_at: chrono::Utc::now().timestamp_millis(),
            clamped: false,
        }
    }

    /// Mark whether applying the operation clamped its bounds.
    pub fn with_clamped(mut self, clamped: bool) -> Self {
        self.clamped = clamped;
        self
    }

    /// Document the operation belongs to.
    pub fn document_id(&self) -> &str {
        &self.operation.document_id
    }
}

/// Full content of a document at a revision.
///
/// Snapshots shorten reconstruction; the log is never truncated behind them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Document the snapshot belongs to
    pub document_id: String,
    /// Revision the content corresponds to
    pub revision: u64,
    /// Full document content
    pub content: String,
    /// [`content_checksum`] of `content`
    pub checksum: String,
    /// Unix timestamp of snapshot creation (milliseconds)
    pub created_at: i64,
}

impl Snapshot {
    /// Snapshot `content` at `revision`, computing its checksum.
    pub fn new(document_id: impl Into<String>, revision: u64, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            document_id: document_id.into(),
            revision,
            checksum: content_checksum(&content),
            content,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Lowercase hex SHA-256 of the content's UTF-8 bytes.
pub fn content_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
