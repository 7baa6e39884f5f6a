use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for tandem operations
#[derive(Debug, Error)]
pub enum TandemError {
    // Ingress errors
    /// Malformed input, rejected before transform
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // Sequencing errors
    /// The document's pending-submission queue is full
    #[error("Document '{document_id}' has {limit} submissions pending, retry later")]
    TransientOverload {
        /// Overloaded document
        document_id: String,
        /// Configured queue bound
        limit: usize,
    },

    /// The client's view diverged and must be resynced from history
    #[error("Conflict on document '{document_id}': {reason}")]
    Conflict {
        /// Affected document
        document_id: String,
        /// What diverged
        reason: String,
    },

    // Storage errors
    /// A durable append or read failed
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// SQLite backend error
    #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored operation could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The stored log cannot be replayed
    #[error("History of '{document_id}' is corrupt at revision {revision}: {reason}")]
    CorruptHistory {
        /// Affected document
        document_id: String,
        /// Revision where replay failed
        revision: u64,
        /// What was wrong
        reason: String,
    },
}

/// Result type alias for tandem operations
pub type Result<T> = std::result::Result<T, TandemError>;

impl TandemError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            TandemError::InvalidOperation(_) => "invalid_operation",
            TandemError::TransientOverload { .. } => "transient_overload",
            TandemError::Conflict { .. } => "conflict",
            TandemError::StorageFailure(_) => "storage_failure",
            #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
            TandemError::Database(_) => "storage_failure",
            TandemError::Json(_) => "storage_failure",
            TandemError::CorruptHistory { .. } => "storage_failure",
        }
    }

    /// Whether the client may resubmit the same operation unchanged.
    ///
    /// Invalid operations must be fixed first, and conflicts require a full
    /// resync before any further submission.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TandemError::InvalidOperation(_) | TandemError::Conflict { .. }
        )
    }

    /// Convert to a serializable representation for the wire
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::from(self)
    }
}

/// A serializable representation of [`TandemError`] sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code (`invalid_operation`, `conflict`, ...)
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Document the failed request targeted, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Client sequence number of the failed submission, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_seq: Option<u64>,
    /// Whether resubmitting unchanged can succeed
    pub retryable: bool,
}

impl ErrorPayload {
    /// Attach the submission this error refers to.
    pub fn for_submission(mut self, document_id: &str, local_seq: u64) -> Self {
        self.document_id = Some(document_id.to_string());
        self.local_seq = Some(local_seq);
        self
    }
}

impl From<&TandemError> for ErrorPayload {
    fn from(err: &TandemError) -> Self {
        let document_id = match err {
            TandemError::TransientOverload { document_id, .. } => Some(document_id.clone()),
            TandemError::Conflict { document_id, .. } => Some(document_id.clone()),
            TandemError::CorruptHistory { document_id, .. } => Some(document_id.clone()),
            _ => None,
        };

        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            document_id,
            local_seq: None,
            retryable: err.is_retryable(),
        }
    }
}

impl From<TandemError> for ErrorPayload {
    fn from(err: TandemError) -> Self {
        ErrorPayload::from(&err)
    }
}
