//! JSON wire protocol.
//!
//! Every frame is a text message `{"type": <kind>, "payload": {...}}`.
//!
//! | type                        | direction        | payload              |
//! |-----------------------------|------------------|----------------------|
//! | `operation.submit`          | client -> server | [`OperationPayload`] |
//! | `document.subscribe`        | client -> server | [`DocumentRef`]      |
//! | `document.unsubscribe`      | client -> server | [`DocumentRef`]      |
//! | `document.history.request`  | client -> server | [`HistoryRequest`]   |
//! | `operation.ack`             | server -> author | [`Ack`]              |
//! | `operation.broadcast`       | server -> others | [`Broadcast`]        |
//! | `sync.status`               | server -> client | [`SyncStatus`]       |
//! | `document.history.response` | server -> client | [`HistoryResponse`]  |
//! | `error`                     | server -> client | [`ErrorPayload`]     |

use serde::{Deserialize, Serialize};
use tandem_core::history::CommittedOperation;
use tandem_core::ot::{Operation, OperationPayload};
use tandem_core::{CommitOutcome, ErrorPayload, TandemError};

use super::status::SyncStatus;

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "operation.submit")]
    Submit(OperationPayload),
    #[serde(rename = "document.subscribe")]
    Subscribe(DocumentRef),
    #[serde(rename = "document.unsubscribe")]
    Unsubscribe(DocumentRef),
    #[serde(rename = "document.history.request")]
    HistoryRequest(HistoryRequest),
}

impl ClientMessage {
    /// Parse a text frame. Malformed frames are invalid operations.
    pub fn parse(text: &str) -> Result<Self, TandemError> {
        serde_json::from_str(text)
            .map_err(|e| TandemError::InvalidOperation(format!("malformed message: {}", e)))
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "operation.ack")]
    Ack(Ack),
    #[serde(rename = "operation.broadcast")]
    Broadcast(Broadcast),
    #[serde(rename = "sync.status")]
    Status(SyncStatus),
    #[serde(rename = "document.history.response")]
    HistoryResponse(HistoryResponse),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Error frame refusing a watch request.
    pub fn unauthorized(document_id: &str) -> Self {
        ServerMessage::Error(ErrorPayload {
            code: "unauthorized".to_string(),
            message: format!("not allowed to watch '{}'", document_id),
            document_id: Some(document_id.to_string()),
            local_seq: None,
            retryable: false,
        })
    }
}

/// Names a document in subscribe/unsubscribe requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub document_id: String,
    #[serde(default)]
    pub from_revision: u64,
    /// Checksum of the client's content at `from_revision`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Acknowledgment sent to the author of a committed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub document_id: String,
    pub client_local_seq: u64,
    pub server_revision: u64,
    pub final_position: usize,
    pub final_length: usize,
    /// Bounds were clamped because concurrent deletes removed the target
    #[serde(default)]
    pub clamped: bool,
    /// The submission had already been committed earlier
    #[serde(default)]
    pub duplicate: bool,
}

impl From<&CommitOutcome> for Ack {
    fn from(outcome: &CommitOutcome) -> Self {
        let op = outcome.operation();
        Self {
            document_id: op.document_id.clone(),
            client_local_seq: op.local_seq,
            server_revision: outcome.revision(),
            final_position: op.final_position(),
            final_length: op.final_length(),
            clamped: outcome.clamped,
            duplicate: outcome.duplicate,
        }
    }
}

/// A committed operation relayed to the other watchers of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcast {
    pub document_id: String,
    pub operation: Operation,
    pub server_revision: u64,
}

impl From<&CommitOutcome> for Broadcast {
    fn from(outcome: &CommitOutcome) -> Self {
        Self {
            document_id: outcome.operation().document_id.clone(),
            operation: outcome.operation().clone(),
            server_revision: outcome.revision(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub document_id: String,
    pub operations: Vec<CommittedOperation>,
    pub latest_revision: u64,
}
