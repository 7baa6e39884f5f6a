pub mod api;
pub mod ws;

use std::sync::Arc;

use axum::{Router, routing::get};

use crate::auth::IdentityProvider;
use crate::sync::SyncHub;

pub use api::api_routes;
pub use ws::ws_handler;

/// Routes served by the sync server, without middleware layers.
pub fn router(hub: Arc<SyncHub>, identity: Arc<dyn IdentityProvider>) -> Router {
    let ws_state = ws::WsState {
        hub: hub.clone(),
        identity,
    };
    let api_state = api::ApiState { hub };

    Router::new()
        // Health check
        .route("/", get(|| async { "Tandem Sync Server" }))
        .route("/health", get(|| async { "OK" }))
        // WebSocket sync endpoint
        .route("/sync", get(ws_handler).with_state(ws_state))
        // API routes
        .nest("/api", api_routes(api_state))
}
