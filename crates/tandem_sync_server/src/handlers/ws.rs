use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tandem_core::TandemError;
use tracing::{debug, error, info, warn};

use crate::auth::{Credentials, IdentityProvider};
use crate::sync::{ClientConnection, SyncHub};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Auth token (optional in query, can also use header)
    pub token: Option<String>,
    /// Self-declared identity, honoured only in development mode
    pub client_id: Option<String>,
}

/// Shared state for WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<SyncHub>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let credentials = Credentials::from_request(&headers, query.token, query.client_id);

    let Some(client_id) = state.identity.identify(&credentials) else {
        warn!("WebSocket connection rejected: invalid or missing credentials");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    info!("WebSocket upgrade: client={}", client_id);

    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, client_id))
        .into_response()
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<SyncHub>, client_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut connection = ClientConnection::new(client_id.clone(), hub);

    info!(
        "WebSocket connected: client={}, connection={}",
        client_id, connection.id
    );

    loop {
        tokio::select! {
            // Handle incoming messages from client
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        connection.handle_text(text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let e = TandemError::InvalidOperation(
                            "binary frames are not supported".to_string(),
                        );
                        connection.reject(&e);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client closed connection");
                        break;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            // Handle messages queued by the hub
            outgoing = connection.recv() => {
                let Some(message) = outgoing else {
                    warn!("Connection {} dropped by hub, closing", connection.id);
                    break;
                };
                let text = match message.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;

    info!(
        "WebSocket disconnected: client={}, connection={}",
        client_id, connection.id
    );

    // Connection will be dropped here, which removes its watches
}
