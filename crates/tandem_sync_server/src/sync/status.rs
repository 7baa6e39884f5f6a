use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Sync state of one client on one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Every submission of the client has been committed
    Synced,
    /// Submissions are awaiting acknowledgment
    Syncing,
    /// Local state diverged; discard it and refetch history from revision 0
    Conflict,
}

/// Payload of a `sync.status` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub document_id: String,
    pub state: SyncState,
    pub pending_count: usize,
    /// Latest committed revision, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl SyncStatus {
    pub fn new(document_id: &str, state: SyncState, pending_count: usize) -> Self {
        Self {
            document_id: document_id.to_string(),
            state,
            pending_count,
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }
}

/// Outstanding submissions per `(document_id, client_id)`.
///
/// `begin` and `finish` return a status only on a state transition, so
/// clients are not flooded while a burst of submissions drains.
#[derive(Default)]
pub struct StatusTracker {
    pending: Mutex<HashMap<(String, String), usize>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A submission started. Returns `Syncing` if the client was synced.
    pub fn begin(&self, document_id: &str, client_id: &str) -> Option<SyncStatus> {
        let mut pending = self.pending.lock().unwrap();
        let count = pending
            .entry((document_id.to_string(), client_id.to_string()))
            .or_insert(0);
        *count += 1;
        (*count == 1).then(|| SyncStatus::new(document_id, SyncState::Syncing, 1))
    }

    /// A submission finished, committed or not. Returns `Synced` once the
    /// client has nothing outstanding.
    pub fn finish(&self, document_id: &str, client_id: &str) -> Option<SyncStatus> {
        let mut pending = self.pending.lock().unwrap();
        let key = (document_id.to_string(), client_id.to_string());
        let count = pending.get_mut(&key)?;
        *count = count.saturating_sub(1);
        if *count > 0 {
            return None;
        }
        pending.remove(&key);
        Some(SyncStatus::new(document_id, SyncState::Synced, 0))
    }

    /// The client's view diverged. Its outstanding submissions are forgotten.
    pub fn conflict(&self, document_id: &str, client_id: &str) -> SyncStatus {
        self.pending
            .lock()
            .unwrap()
            .remove(&(document_id.to_string(), client_id.to_string()));
        SyncStatus::new(document_id, SyncState::Conflict, 0)
    }

    /// Current status without changing it.
    pub fn current(&self, document_id: &str, client_id: &str) -> SyncStatus {
        let count = self
            .pending
            .lock()
            .unwrap()
            .get(&(document_id.to_string(), client_id.to_string()))
            .copied()
            .unwrap_or(0);
        let state = if count == 0 {
            SyncState::Synced
        } else {
            SyncState::Syncing
        };
        SyncStatus::new(document_id, state, count)
    }

    /// Forget a client entirely.
    pub fn clear_client(&self, client_id: &str) {
        self.pending
            .lock()
            .unwrap()
            .retain(|(_, client), _| client != client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_only_on_edges() {
        let tracker = StatusTracker::new();

        let first = tracker.begin("doc", "alice").unwrap();
        assert_eq!(first.state, SyncState::Syncing);
        assert!(tracker.begin("doc", "alice").is_none());
        assert_eq!(tracker.current("doc", "alice").pending_count, 2);

        assert!(tracker.finish("doc", "alice").is_none());
        let done = tracker.finish("doc", "alice").unwrap();
        assert_eq!(done.state, SyncState::Synced);
        assert_eq!(done.pending_count, 0);
        assert!(tracker.finish("doc", "alice").is_none());
    }

    #[test]
    fn test_conflict_resets_pending() {
        let tracker = StatusTracker::new();
        tracker.begin("doc", "alice");
        tracker.begin("doc", "bob");

        let status = tracker.conflict("doc", "alice");
        assert_eq!(status.state, SyncState::Conflict);
        assert_eq!(tracker.current("doc", "alice").state, SyncState::Synced);
        assert_eq!(tracker.current("doc", "bob").state, SyncState::Syncing);

        tracker.clear_client("bob");
        assert_eq!(tracker.current("doc", "bob").pending_count, 0);
    }

    #[test]
    fn test_status_wire_format() {
        let status = SyncStatus::new("doc", SyncState::Synced, 0).with_revision(4);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "Synced");
        assert_eq!(json["pending_count"], 0);
        assert_eq!(json["revision"], 4);
    }
}
