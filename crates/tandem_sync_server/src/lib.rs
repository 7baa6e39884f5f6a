//! Tandem Sync Server
//!
//! A WebSocket server that sequences concurrent text edits with
//! operational transform, backed by tandem_core.
//!
//! ## Features
//!
//! - **Server-authoritative OT**: every submission is rebased over the
//!   operations committed since its base revision, then durably appended
//! - **Live fan-out**: authors get an acknowledgment, other watchers get the
//!   committed operation
//! - **Resync**: clients fetch missed operations by revision, with checksum
//!   verification
//! - **Persistent storage**: SQLite-based append-only operation history
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3030)
//! - `DATABASE_PATH`: Path to SQLite history (default: ./tandem_history.db, `:memory:` for none)
//! - `MAX_PENDING_PER_DOCUMENT`: Queued submissions per document before overload (default: 64)
//! - `SNAPSHOT_INTERVAL`: Revisions between content snapshots, 0 disables (default: 100)
//! - `OUTBOUND_QUEUE_CAPACITY`: Messages buffered per connection (default: 256)
//! - `AUTH_TOKENS`: `token=client_id` pairs, comma-separated; empty trusts `client_id`
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins

pub mod auth;
pub mod config;
pub mod handlers;
pub mod sync;

pub use config::Config;
