//! Operation model and ingress validation.
//!
//! An [`Operation`] is one edit intent: an ordered list of primitive
//! [`Component`]s applied sequentially as a single causal step. Clients send
//! an [`OperationPayload`], which is validated into an `Operation` before it
//! reaches the transform engine.
//!
//! Positions and lengths count `char`s, not bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TandemError};

/// A primitive edit against linear text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Component {
    /// Insert `content` before the char at `position`.
    Insert {
        /// Char offset to insert at
        position: usize,
        /// Inserted text
        content: String,
    },
    /// Remove `length` chars starting at `position`.
    Delete {
        /// Char offset of the first removed char
        position: usize,
        /// Number of chars removed
        length: usize,
    },
}

impl Component {
    /// Create an insert component.
    pub fn insert(position: usize, content: impl Into<String>) -> Self {
        Component::Insert {
            position,
            content: content.into(),
        }
    }

    /// Create a delete component.
    pub fn delete(position: usize, length: usize) -> Self {
        Component::Delete { position, length }
    }

    /// Start position of the component.
    pub fn position(&self) -> usize {
        match self {
            Component::Insert { position, .. } | Component::Delete { position, .. } => *position,
        }
    }

    /// Number of chars inserted or removed.
    pub fn extent(&self) -> usize {
        match self {
            Component::Insert { content, .. } => content.chars().count(),
            Component::Delete { length, .. } => *length,
        }
    }

    /// A component that leaves the content untouched.
    pub fn is_noop(&self) -> bool {
        self.extent() == 0
    }
}

/// An edit intent against a document at an assumed base revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Target document
    pub document_id: String,
    /// Author, as resolved from the session
    pub client_id: String,
    /// Client-monotonic sequence number; `(client_id, local_seq)` identifies
    /// a submission for idempotent retries.
    pub local_seq: u64,
    /// Revision the client believed current when authoring the operation.
    pub base_revision: u64,
    /// Edits applied in order as one step
    pub components: Vec<Component>,
}

impl Operation {
    /// Create a new operation.
    pub fn new(
        document_id: impl Into<String>,
        client_id: impl Into<String>,
        local_seq: u64,
        base_revision: u64,
        components: Vec<Component>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            client_id: client_id.into(),
            local_seq,
            base_revision,
            components,
        }
    }

    /// Ordering key used to break ties between concurrent inserts at the
    /// same position. Smaller keys are treated as having inserted first.
    pub fn author_key(&self) -> (&str, u64) {
        (&self.client_id, self.local_seq)
    }

    /// Position reported back to the author after transformation.
    pub fn final_position(&self) -> usize {
        self.components
            .iter()
            .map(Component::position)
            .min()
            .unwrap_or(0)
    }

    /// Total number of chars inserted or removed by the operation.
    pub fn final_length(&self) -> usize {
        self.components.iter().map(Component::extent).sum()
    }

    /// Check structural invariants of an already-typed operation.
    pub fn validate(&self) -> Result<()> {
        if self.document_id.trim().is_empty() {
            return Err(TandemError::InvalidOperation(
                "document_id is required".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(TandemError::InvalidOperation(
                "client_id is required".to_string(),
            ));
        }
        if self.components.is_empty() {
            return Err(TandemError::InvalidOperation(
                "operation has no components".to_string(),
            ));
        }
        for component in &self.components {
            if let Component::Insert { content, .. } = component
                && content.is_empty()
            {
                return Err(TandemError::InvalidOperation(
                    "insert requires non-empty content".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Operation types accepted at ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Insert `content` at `position`
    Insert,
    /// Remove `length` chars at `position`
    Delete,
    /// Replace `length` chars at `position` with `content`. Not a primitive:
    /// decomposed into a delete followed by an insert.
    Modify,
}

impl FromStr for OpKind {
    type Err = TandemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(OpKind::Insert),
            "delete" => Ok(OpKind::Delete),
            "modify" => Ok(OpKind::Modify),
            _ => Err(TandemError::InvalidOperation(format!(
                "unrecognized operation type '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Insert => write!(f, "Insert"),
            OpKind::Delete => write!(f, "Delete"),
            OpKind::Modify => write!(f, "Modify"),
        }
    }
}

/// Wire form of an `operation.submit` payload.
///
/// Numeric fields are signed so that malformed negative values are rejected
/// by validation instead of failing deserialization opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPayload {
    /// Target document
    pub document_id: String,
    /// Optional echo of the session identity. Must match it when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Client-monotonic sequence number
    pub local_seq: u64,
    /// Revision the client authored against
    pub base_revision: i64,
    /// `Insert`, `Delete` or `Modify`, case-insensitive
    #[serde(rename = "type")]
    pub kind: String,
    /// Char offset of the edit
    pub position: i64,
    /// Text for inserts and modifies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Char count for deletes and modifies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
}

impl OperationPayload {
    /// Validate the payload and build the operation for `session_client`.
    pub fn into_operation(self, session_client: &str) -> Result<Operation> {
        let invalid = |msg: String| Err(TandemError::InvalidOperation(msg));

        if self.document_id.trim().is_empty() {
            return invalid("document_id is required".to_string());
        }
        if let Some(claimed) = &self.client_id
            && claimed != session_client
        {
            return invalid(format!(
                "client_id '{}' does not match the session identity",
                claimed
            ));
        }
        if self.base_revision < 0 {
            return invalid(format!("base_revision {} is negative", self.base_revision));
        }
        if self.position < 0 {
            return invalid(format!("position {} is negative", self.position));
        }

        let kind: OpKind = self.kind.parse()?;
        let position = self.position as usize;

        let length = match (kind, self.length) {
            (OpKind::Insert, _) => 0,
            (_, Some(length)) if length < 0 => {
                return invalid(format!("length {} is negative", length));
            }
            (_, Some(length)) => length as usize,
            (_, None) => return invalid(format!("{} requires a length", kind)),
        };

        let components = match kind {
            OpKind::Insert => match self.content {
                Some(content) if !content.is_empty() => vec![Component::insert(position, content)],
                _ => return invalid("insert requires non-empty content".to_string()),
            },
            OpKind::Delete => vec![Component::delete(position, length)],
            OpKind::Modify => {
                let content = self.content.unwrap_or_default();
                let mut components = vec![Component::delete(position, length)];
                if !content.is_empty() {
                    components.push(Component::insert(position, content));
                }
                components
            }
        };

        let operation = Operation::new(
            self.document_id,
            session_client,
            self.local_seq,
            self.base_revision as u64,
            components,
        );
        operation.validate()?;
        Ok(operation)
    }
}
