#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Error (common error types and their wire form)
pub mod error;

/// Operations, transform engine and component application
pub mod ot;

/// Per-document sequencing state
pub mod document;

/// Durable, append-only operation history
pub mod history;

pub use document::{CommitOutcome, Document};
pub use error::{ErrorPayload, Result, TandemError};
