use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tandem_core::TandemError;
use tandem_core::history::HistoryStore;
use tandem_core::ot::Operation;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::manager::DocumentManager;
use super::protocol::{Ack, Broadcast, ClientMessage, HistoryRequest, HistoryResponse, ServerMessage};
use super::registry::{ConnectionId, SubscriptionRegistry};
use super::status::StatusTracker;
use crate::auth::{AccessPolicy, AllowAll};
use crate::config::Config;

/// Statistics about the sync hub
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub active_connections: usize,
    pub active_documents: usize,
    pub watched_documents: usize,
}

struct ConnectionHandle {
    client_id: String,
    outbound: mpsc::Sender<ServerMessage>,
}

/// Routes client messages to documents and fans results back out.
///
/// Each connection gets a bounded outbound queue. A connection that falls
/// so far behind that its queue overflows is dropped; it reconnects and
/// resyncs from history.
pub struct SyncHub {
    documents: DocumentManager,
    registry: SubscriptionRegistry,
    status: StatusTracker,
    access: Arc<dyn AccessPolicy>,
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    queue_capacity: usize,
}

impl SyncHub {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        access: Arc<dyn AccessPolicy>,
        max_pending: usize,
        snapshot_interval: u64,
        queue_capacity: usize,
    ) -> Self {
        Self {
            documents: DocumentManager::new(store, max_pending, snapshot_interval),
            registry: SubscriptionRegistry::new(),
            status: StatusTracker::new(),
            access,
            connections: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Hub configured from the environment settings, allowing every watch.
    pub fn from_config(store: Arc<dyn HistoryStore>, config: &Config) -> Self {
        Self::new(
            store,
            Arc::new(AllowAll),
            config.max_pending_per_document,
            config.snapshot_interval,
            config.outbound_queue_capacity,
        )
    }

    pub fn documents(&self) -> &DocumentManager {
        &self.documents
    }

    /// Register a connection and return its id and outbound queue.
    pub fn connect(&self, client_id: &str) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        self.connections.write().unwrap().insert(
            id,
            ConnectionHandle {
                client_id: client_id.to_string(),
                outbound: tx,
            },
        );
        info!("Client connected: client={}, connection={}", client_id, id);
        (id, rx)
    }

    /// Forget a connection: its watches, its pending status and its queue.
    pub fn disconnect(&self, connection: ConnectionId) {
        let Some(handle) = self.connections.write().unwrap().remove(&connection) else {
            return;
        };

        let still_connected = self
            .connections
            .read()
            .unwrap()
            .values()
            .any(|other| other.client_id == handle.client_id);
        if !still_connected {
            self.status.clear_client(&handle.client_id);
        }

        for document_id in self.registry.disconnect(connection) {
            self.release_if_unwatched(&document_id);
        }

        info!(
            "Client disconnected: client={}, connection={}",
            handle.client_id, connection
        );
    }

    /// Process one message from a connection.
    pub async fn handle(&self, connection: ConnectionId, message: ClientMessage) {
        let Some(client_id) = self.client_id(connection) else {
            debug!("Message for closed connection {}", connection);
            return;
        };

        match message {
            ClientMessage::Submit(payload) => {
                let document_id = payload.document_id.clone();
                let local_seq = payload.local_seq;
                match payload.into_operation(&client_id) {
                    Ok(op) => self.submit(connection, &client_id, op).await,
                    Err(e) => self.send_error(connection, &e, Some((&document_id, local_seq))),
                }
            }
            ClientMessage::Subscribe(doc) => {
                self.subscribe(connection, &client_id, &doc.document_id)
                    .await
            }
            ClientMessage::Unsubscribe(doc) => {
                if self.registry.unwatch(connection, &doc.document_id) {
                    debug!("{} stopped watching {}", client_id, doc.document_id);
                    self.release_if_unwatched(&doc.document_id);
                }
            }
            ClientMessage::HistoryRequest(request) => {
                self.history(connection, &client_id, request).await
            }
        }
    }

    /// Report a message that could not be parsed.
    pub fn reject(&self, connection: ConnectionId, error: &TandemError) {
        self.send_error(connection, error, None);
    }

    async fn submit(&self, connection: ConnectionId, client_id: &str, op: Operation) {
        let document_id = op.document_id.clone();
        let local_seq = op.local_seq;

        if let Some(status) = self.status.begin(&document_id, client_id) {
            self.send(connection, ServerMessage::Status(status));
        }

        match self.documents.submit(op).await {
            Ok(outcome) => {
                self.send(connection, ServerMessage::Ack(Ack::from(&outcome)));

                // The entry is durable by now; others may see it.
                if !outcome.duplicate {
                    let broadcast = ServerMessage::Broadcast(Broadcast::from(&outcome));
                    for subscriber in self.registry.subscribers(&document_id) {
                        if subscriber != connection {
                            self.send(subscriber, broadcast.clone());
                        }
                    }
                }

                if let Some(status) = self.status.finish(&document_id, client_id) {
                    self.send(
                        connection,
                        ServerMessage::Status(status.with_revision(outcome.revision())),
                    );
                }
            }
            Err(e) => {
                warn!(
                    "Submission ({}, {}) on {} failed: {}",
                    client_id, local_seq, document_id, e
                );
                if matches!(e, TandemError::Conflict { .. }) {
                    let status = self.status.conflict(&document_id, client_id);
                    self.send(connection, ServerMessage::Status(status));
                } else if let Some(status) = self.status.finish(&document_id, client_id) {
                    self.send(connection, ServerMessage::Status(status));
                }
                self.send_error(connection, &e, Some((&document_id, local_seq)));
            }
        }

        self.release_if_unwatched(&document_id);
    }

    async fn subscribe(&self, connection: ConnectionId, client_id: &str, document_id: &str) {
        if document_id.trim().is_empty() {
            let e = TandemError::InvalidOperation("document_id is required".to_string());
            self.send_error(connection, &e, None);
            return;
        }
        if !self.access.may_watch(client_id, document_id) {
            warn!("{} denied watching {}", client_id, document_id);
            self.send(connection, ServerMessage::unauthorized(document_id));
            return;
        }

        match self.documents.revision(document_id).await {
            Ok(revision) => {
                self.registry.watch(connection, document_id);
                debug!("{} watching {} at revision {}", client_id, document_id, revision);
                let status = self.status.current(document_id, client_id);
                self.send(connection, ServerMessage::Status(status.with_revision(revision)));
            }
            Err(e) => {
                warn!("Failed to load {} for {}: {}", document_id, client_id, e);
                self.send_error(connection, &e, None);
                self.release_if_unwatched(document_id);
            }
        }
    }

    async fn history(&self, connection: ConnectionId, client_id: &str, request: HistoryRequest) {
        let reply = match self
            .documents
            .history(
                &request.document_id,
                request.from_revision,
                request.checksum.as_deref(),
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("History of {} failed: {}", request.document_id, e);
                self.send_error(connection, &e, None);
                self.release_if_unwatched(&request.document_id);
                return;
            }
        };

        if let Some(reason) = &reply.conflict {
            warn!(
                "{} diverged on {}: {}; sending full history",
                client_id, request.document_id, reason
            );
            let status = self.status.conflict(&request.document_id, client_id);
            self.send(
                connection,
                ServerMessage::Status(status.with_revision(reply.latest_revision)),
            );
        }

        self.send(
            connection,
            ServerMessage::HistoryResponse(HistoryResponse {
                document_id: request.document_id.clone(),
                operations: reply.operations,
                latest_revision: reply.latest_revision,
            }),
        );
        self.release_if_unwatched(&request.document_id);
    }

    fn client_id(&self, connection: ConnectionId) -> Option<String> {
        self.connections
            .read()
            .unwrap()
            .get(&connection)
            .map(|handle| handle.client_id.clone())
    }

    fn send_error(
        &self,
        connection: ConnectionId,
        error: &TandemError,
        submission: Option<(&str, u64)>,
    ) {
        let mut payload = error.to_payload();
        if let Some((document_id, local_seq)) = submission {
            payload = payload.for_submission(document_id, local_seq);
        }
        self.send(connection, ServerMessage::Error(payload));
    }

    /// Queue a message without waiting. A full queue drops the connection.
    fn send(&self, connection: ConnectionId, message: ServerMessage) {
        let result = {
            let connections = self.connections.read().unwrap();
            match connections.get(&connection) {
                Some(handle) => handle.outbound.try_send(message),
                None => return,
            }
        };

        match result {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue of connection {} is full, dropping it",
                    connection
                );
                self.disconnect(connection);
            }
            Err(TrySendError::Closed(_)) => self.disconnect(connection),
        }
    }

    /// Evict a document from memory if no connection watches it.
    pub fn release_if_unwatched(&self, document_id: &str) {
        if !self.registry.is_watched(document_id) {
            self.documents.evict_if_idle(document_id);
        }
    }

    /// Get statistics about the sync hub
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            active_connections: self.connections.read().unwrap().len(),
            active_documents: self.documents.resident_count(),
            watched_documents: self.registry.watched_count(),
        }
    }
}
