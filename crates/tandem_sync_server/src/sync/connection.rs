use std::sync::Arc;

use tandem_core::TandemError;
use tokio::sync::mpsc;
use tracing::debug;

use super::hub::SyncHub;
use super::protocol::{ClientMessage, ServerMessage};
use super::registry::ConnectionId;

/// Represents a connected client
///
/// Dropping the connection removes its watches from the hub.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub client_id: String,
    hub: Arc<SyncHub>,
    outbound: mpsc::Receiver<ServerMessage>,
}

impl ClientConnection {
    /// Register a new client connection with the hub
    pub fn new(client_id: String, hub: Arc<SyncHub>) -> Self {
        let (id, outbound) = hub.connect(&client_id);
        Self {
            id,
            client_id,
            hub,
            outbound,
        }
    }

    /// Handle an incoming text frame from the client
    pub async fn handle_text(&self, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.hub.handle(self.id, message).await,
            Err(e) => {
                debug!("Rejected frame from {}: {}", self.client_id, e);
                self.reject(&e);
            }
        }
    }

    /// Report a frame that could not be handled.
    pub fn reject(&self, error: &TandemError) {
        self.hub.reject(self.id, error);
    }

    /// Receive the next message queued for this client.
    ///
    /// Returns `None` once the hub has dropped the connection.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.outbound.recv().await
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
        debug!(
            "Client connection closed: client={}, connection={}",
            self.client_id, self.id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use tandem_core::history::MemoryHistory;

    fn hub() -> Arc<SyncHub> {
        Arc::new(SyncHub::new(
            Arc::new(MemoryHistory::new()),
            Arc::new(AllowAll),
            8,
            0,
            16,
        ))
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error() {
        let hub = hub();
        let mut conn = ClientConnection::new("alice".to_string(), hub.clone());

        conn.handle_text("{\"type\":\"bogus\"}").await;

        match conn.recv().await {
            Some(ServerMessage::Error(err)) => {
                assert_eq!(err.code, "invalid_operation");
                assert!(err.local_seq.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drop_disconnects() {
        let hub = hub();
        let conn = ClientConnection::new("alice".to_string(), hub.clone());
        conn.handle_text(r#"{"type":"document.subscribe","payload":{"document_id":"doc"}}"#)
            .await;
        assert_eq!(hub.stats().active_connections, 1);
        assert_eq!(hub.stats().watched_documents, 1);

        drop(conn);
        assert_eq!(hub.stats().active_connections, 0);
        assert_eq!(hub.stats().watched_documents, 0);
    }
}
