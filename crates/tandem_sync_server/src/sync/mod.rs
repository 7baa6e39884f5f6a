mod connection;
mod hub;
mod manager;
mod protocol;
mod registry;
mod status;

pub use connection::ClientConnection;
pub use hub::{SyncHub, SyncStats};
pub use manager::{DocumentManager, DocumentView, HistoryReply};
pub use protocol::{
    Ack, Broadcast, ClientMessage, DocumentRef, HistoryRequest, HistoryResponse, ServerMessage,
};
pub use registry::{ConnectionId, SubscriptionRegistry};
pub use status::{StatusTracker, SyncState, SyncStatus};
