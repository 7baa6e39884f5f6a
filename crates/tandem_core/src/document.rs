//! Per-document sequencing state.
//!
//! A [`Document`] owns the canonical content and committed revision of one
//! document and turns submissions into committed operations:
//!
//! 1. Select committed operations newer than the submission's base revision
//! 2. Rebase the submission over each of them in commit order
//! 3. Apply the result to the content, clamping out-of-range bounds
//! 4. Durably append, then update content and revision
//!
//! A submission is all-or-nothing: if the append fails, neither content nor
//! revision change. `Document` is not synchronized; callers serialize access
//! per document.

use std::collections::HashMap;

use crate::error::{Result, TandemError};
use crate::history::{CommittedOperation, HistoryStore, Snapshot, content_checksum, reconstruct};
use crate::ot::{Operation, apply_components, transform_all};

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The committed, transformed operation and its revision.
    pub entry: CommittedOperation,
    /// Some bounds were clamped because concurrent deletes removed the text.
    pub clamped: bool,
    /// The submission had already been committed; nothing new happened.
    pub duplicate: bool,
}

impl CommitOutcome {
    /// Revision the operation was committed at.
    pub fn revision(&self) -> u64 {
        self.entry.revision
    }

    /// The committed operation.
    pub fn operation(&self) -> &Operation {
        &self.entry.operation
    }
}

/// Canonical state of one document.
#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    content: String,
    revision: u64,
    /// Write a snapshot every this many revisions; 0 disables snapshots.
    snapshot_interval: u64,
    /// Revisions of submissions committed while this document was resident,
    /// keyed by `(client_id, local_seq)`.
    committed_submissions: HashMap<(String, u64), u64>,
}

impl Document {
    /// Create an empty document at revision 0.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: String::new(),
            revision: 0,
            snapshot_interval: 0,
            committed_submissions: HashMap::new(),
        }
    }

    /// Load a document from history: latest snapshot plus the log tail.
    pub fn load(id: &str, store: &dyn HistoryStore) -> Result<Self> {
        let (content, revision) = reconstruct(store, id, None)?;
        log::debug!("Loaded document '{}' at revision {}", id, revision);
        Ok(Self {
            content,
            revision,
            ..Self::new(id)
        })
    }

    /// Set the snapshot interval (0 disables snapshots).
    pub fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Document id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current canonical content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Latest committed revision; equals the length of the committed log.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Checksum of the current content.
    pub fn checksum(&self) -> String {
        content_checksum(&self.content)
    }

    /// Sequence a submission and commit it.
    ///
    /// # Errors
    ///
    /// - [`TandemError::InvalidOperation`] if the operation is malformed or
    ///   targets another document
    /// - [`TandemError::Conflict`] if `base_revision` is ahead of this document
    /// - [`TandemError::StorageFailure`] (or a wrapped backend error) if
    ///   history could not be read or the append failed; no state changed
    pub fn submit(&mut self, op: Operation, store: &dyn HistoryStore) -> Result<CommitOutcome> {
        op.validate()?;
        if op.document_id != self.id {
            return Err(TandemError::InvalidOperation(format!(
                "operation for '{}' submitted to '{}'",
                op.document_id, self.id
            )));
        }

        if let Some(entry) = self.find_committed(&op, store)? {
            log::debug!(
                "Duplicate submission ({}, {}) on '{}' already at revision {}",
                op.client_id,
                op.local_seq,
                self.id,
                entry.revision
            );
            return Ok(CommitOutcome {
                clamped: entry.clamped,
                entry,
                duplicate: true,
            });
        }

        if op.base_revision > self.revision {
            return Err(TandemError::Conflict {
                document_id: self.id.clone(),
                reason: format!(
                    "base revision {} is ahead of committed revision {}",
                    op.base_revision, self.revision
                ),
            });
        }

        let concurrent = store.get_operations_between(&self.id, op.base_revision, self.revision)?;
        if concurrent.len() as u64 != self.revision - op.base_revision {
            return Err(TandemError::CorruptHistory {
                document_id: self.id.clone(),
                revision: self.revision,
                reason: format!(
                    "expected {} operations after revision {}, found {}",
                    self.revision - op.base_revision,
                    op.base_revision,
                    concurrent.len()
                ),
            });
        }

        let rebased = transform_all(&op, concurrent.iter().map(|entry| &entry.operation));
        let applied = apply_components(&self.content, &rebased.components);
        if applied.clamped {
            log::warn!(
                "Range clamped for ({}, {}) on '{}': {:?} -> {:?}",
                op.client_id,
                op.local_seq,
                self.id,
                rebased.components,
                applied.components
            );
        }

        let revision = self.revision + 1;
        let entry = CommittedOperation::new(
            revision,
            Operation {
                base_revision: self.revision,
                components: applied.components,
                ..rebased
            },
        )
        .with_clamped(applied.clamped);

        // Write-ahead: nothing below runs unless the append is durable.
        store.append(&entry)?;

        self.content = applied.content;
        self.revision = revision;
        self.committed_submissions
            .insert((op.client_id.clone(), op.local_seq), revision);

        log::debug!(
            "Committed ({}, {}) on '{}' at revision {} (rebased over {})",
            op.client_id,
            op.local_seq,
            self.id,
            revision,
            concurrent.len()
        );

        self.maybe_snapshot(store);

        Ok(CommitOutcome {
            entry,
            clamped: applied.clamped,
            duplicate: false,
        })
    }

    fn find_committed(
        &self,
        op: &Operation,
        store: &dyn HistoryStore,
    ) -> Result<Option<CommittedOperation>> {
        let key = (op.client_id.clone(), op.local_seq);
        match self.committed_submissions.get(&key) {
            Some(&revision) => Ok(store
                .get_operations_between(&self.id, revision - 1, revision)?
                .into_iter()
                .next()),
            None => store.find_submission(&self.id, &op.client_id, op.local_seq),
        }
    }

    fn maybe_snapshot(&self, store: &dyn HistoryStore) {
        if self.snapshot_interval == 0 || self.revision % self.snapshot_interval != 0 {
            return;
        }
        let snapshot = Snapshot::new(self.id.clone(), self.revision, self.content.clone());
        match store.save_snapshot(&snapshot) {
            Ok(()) => log::debug!("Snapshot of '{}' at revision {}", self.id, self.revision),
            Err(e) => log::warn!(
                "Failed to snapshot '{}' at revision {}: {}",
                self.id,
                self.revision,
                e
            ),
        }
    }

    /// Content as of `revision`, rebuilt from history.
    pub fn content_at(&self, revision: u64, store: &dyn HistoryStore) -> Result<String> {
        if revision > self.revision {
            return Err(TandemError::Conflict {
                document_id: self.id.clone(),
                reason: format!(
                    "revision {} is ahead of committed revision {}",
                    revision, self.revision
                ),
            });
        }
        if revision == self.revision {
            return Ok(self.content.clone());
        }
        let (content, _) = reconstruct(store, &self.id, Some(revision))?;
        Ok(content)
    }
}
