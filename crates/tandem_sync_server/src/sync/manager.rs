use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tandem_core::history::{CommittedOperation, HistoryStore, content_checksum};
use tandem_core::ot::Operation;
use tandem_core::{CommitOutcome, Document, Result, TandemError};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Point-in-time view of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentView {
    pub document_id: String,
    pub revision: u64,
    pub content: String,
    pub checksum: String,
}

/// Result of a history request.
#[derive(Debug, Clone)]
pub struct HistoryReply {
    pub operations: Vec<CommittedOperation>,
    pub latest_revision: u64,
    /// Set when the client's view cannot be reconciled; `operations` then
    /// holds the full log from revision 0.
    pub conflict: Option<String>,
}

/// Serialization point of one document.
struct DocumentSlot {
    /// `None` until the document is first used
    state: Mutex<Option<Document>>,
    /// One permit per queued or in-flight submission
    pending: Arc<Semaphore>,
}

/// Arena of per-document sequencers.
///
/// Documents are created lazily on first reference and may be evicted when
/// idle; their history stays in the store. Each document has its own lock,
/// so submissions to different documents never contend.
pub struct DocumentManager {
    store: Arc<dyn HistoryStore>,
    slots: RwLock<HashMap<String, Arc<DocumentSlot>>>,
    max_pending: usize,
    snapshot_interval: u64,
}

impl DocumentManager {
    pub fn new(store: Arc<dyn HistoryStore>, max_pending: usize, snapshot_interval: u64) -> Self {
        Self {
            store,
            slots: RwLock::new(HashMap::new()),
            max_pending: max_pending.max(1),
            snapshot_interval,
        }
    }

    /// Get or create the slot for a document
    fn slot(&self, document_id: &str) -> Arc<DocumentSlot> {
        // Check if slot exists
        {
            let slots = self.slots.read().unwrap();
            if let Some(slot) = slots.get(document_id) {
                return slot.clone();
            }
        }

        let mut slots = self.slots.write().unwrap();

        // Double-check after acquiring write lock
        if let Some(slot) = slots.get(document_id) {
            return slot.clone();
        }

        let slot = Arc::new(DocumentSlot {
            state: Mutex::new(None),
            pending: Arc::new(Semaphore::new(self.max_pending)),
        });
        slots.insert(document_id.to_string(), slot.clone());
        debug!("Created document slot: {}", document_id);
        slot
    }

    fn load(&self, document_id: &str) -> Result<Document> {
        let doc = Document::load(document_id, self.store.as_ref())?
            .with_snapshot_interval(self.snapshot_interval);
        info!(
            "Loaded document {} at revision {}",
            document_id,
            doc.revision()
        );
        Ok(doc)
    }

    /// Run `f` with exclusive access to the resident document.
    async fn with_document<T>(
        &self,
        slot: &DocumentSlot,
        document_id: &str,
        f: impl FnOnce(&mut Document, &dyn HistoryStore) -> Result<T>,
    ) -> Result<T> {
        let mut state = slot.state.lock().await;
        let doc = match state.take() {
            Some(doc) => doc,
            None => self.load(document_id)?,
        };
        let doc = state.insert(doc);
        f(doc, self.store.as_ref())
    }

    /// Sequence and commit a submission.
    ///
    /// Fails with [`TandemError::TransientOverload`] without waiting if the
    /// document already has `max_pending` submissions queued.
    pub async fn submit(&self, op: Operation) -> Result<CommitOutcome> {
        let document_id = op.document_id.clone();
        let slot = self.slot(&document_id);

        let _permit = slot.pending.clone().try_acquire_owned().map_err(|_| {
            warn!("Submission queue full for document {}", document_id);
            TandemError::TransientOverload {
                document_id: document_id.clone(),
                limit: self.max_pending,
            }
        })?;

        self.with_document(&slot, &document_id, |doc, store| doc.submit(op, store))
            .await
    }

    /// Committed revision of a document, loading it if needed.
    pub async fn revision(&self, document_id: &str) -> Result<u64> {
        let slot = self.slot(document_id);
        self.with_document(&slot, document_id, |doc, _| Ok(doc.revision()))
            .await
    }

    /// Current content, revision and checksum of a document.
    pub async fn view(&self, document_id: &str) -> Result<DocumentView> {
        let slot = self.slot(document_id);
        self.with_document(&slot, document_id, |doc, _| {
            Ok(DocumentView {
                document_id: doc.id().to_string(),
                revision: doc.revision(),
                content: doc.content().to_string(),
                checksum: doc.checksum(),
            })
        })
        .await
    }

    /// Operations after `from_revision` for a resyncing client.
    ///
    /// If `from_revision` is ahead of the document, or `checksum` does not
    /// match the content at `from_revision`, the reply is a conflict carrying
    /// the whole log.
    pub async fn history(
        &self,
        document_id: &str,
        from_revision: u64,
        checksum: Option<&str>,
    ) -> Result<HistoryReply> {
        let slot = self.slot(document_id);
        self.with_document(&slot, document_id, |doc, store| {
            let latest_revision = doc.revision();

            let conflict = if from_revision > latest_revision {
                Some(format!(
                    "revision {} is ahead of committed revision {}",
                    from_revision, latest_revision
                ))
            } else if let Some(expected) = checksum {
                let actual = content_checksum(&doc.content_at(from_revision, store)?);
                (actual != expected)
                    .then(|| format!("checksum mismatch at revision {}", from_revision))
            } else {
                None
            };

            let from = if conflict.is_some() { 0 } else { from_revision };
            let operations = store.get_operations(doc.id(), from)?;

            Ok(HistoryReply {
                operations,
                latest_revision,
                conflict,
            })
        })
        .await
    }

    /// Drop a resident document if nothing is using it.
    ///
    /// Returns whether the document was evicted.
    pub fn evict_if_idle(&self, document_id: &str) -> bool {
        let mut slots = self.slots.write().unwrap();
        // Slots are only cloned under the map lock, so a count of one means
        // no submission or read holds this slot.
        match slots.get(document_id) {
            Some(slot) if Arc::strong_count(slot) == 1 => {
                slots.remove(document_id);
                debug!("Evicted idle document: {}", document_id);
                true
            }
            _ => false,
        }
    }

    /// Number of documents with a live slot.
    pub fn resident_count(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }
}
