use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tandem_core::{ErrorPayload, TandemError};

use crate::sync::{HistoryResponse, SyncHub};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub hub: Arc<SyncHub>,
}

/// Server status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub active_connections: usize,
    pub active_documents: usize,
    pub watched_documents: usize,
}

/// Document state response
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub document_id: String,
    pub revision: u64,
    pub content: String,
    pub checksum: String,
    /// Length in chars
    pub content_length: usize,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<u64>,
}

/// A core error rendered as an HTTP response
pub struct ApiError(TandemError);

impl From<TandemError> for ApiError {
    fn from(err: TandemError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TandemError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            TandemError::TransientOverload { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TandemError::Conflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorPayload::from(&self.0))).into_response()
    }
}

/// Create API routes
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/documents/{document_id}", get(get_document))
        .route("/documents/{document_id}/history", get(get_history))
        .with_state(state)
}

/// GET /api/status - Get server status
async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let stats = state.hub.stats();

    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_connections: stats.active_connections,
        active_documents: stats.active_documents,
        watched_documents: stats.watched_documents,
    })
}

/// GET /api/documents/{document_id} - Current content and revision
async fn get_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let view = state.hub.documents().view(&document_id).await?;
    release(&state, &document_id);

    Ok(Json(DocumentResponse {
        content_length: view.content.chars().count(),
        document_id: view.document_id,
        revision: view.revision,
        content: view.content,
        checksum: view.checksum,
    }))
}

/// GET /api/documents/{document_id}/history?from=N - Committed operations after N
async fn get_history(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let from = query.from.unwrap_or(0);
    let reply = state.hub.documents().history(&document_id, from, None).await?;
    release(&state, &document_id);

    if let Some(reason) = reply.conflict {
        return Err(TandemError::Conflict {
            document_id,
            reason,
        }
        .into());
    }

    Ok(Json(HistoryResponse {
        document_id,
        operations: reply.operations,
        latest_revision: reply.latest_revision,
    }))
}

/// Inspection must not keep documents resident that nobody watches.
fn release(state: &ApiState, document_id: &str) {
    state.hub.release_if_unwatched(document_id);
}
