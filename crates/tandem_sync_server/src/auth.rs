//! Identity and access collaborators.
//!
//! The server never authenticates users itself. An [`IdentityProvider`]
//! turns connection credentials into a `client_id`, and an [`AccessPolicy`]
//! decides whether that client may watch a document.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;

use crate::config::Config;

/// Credentials presented when a connection is opened.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Bearer token from the `Authorization` header or `token` query param
    pub token: Option<String>,
    /// Self-declared client id from the `client_id` query param
    pub client_id: Option<String>,
}

impl Credentials {
    /// Collect credentials, preferring the `Authorization` header over the
    /// query-string token.
    pub fn from_request(
        headers: &HeaderMap,
        token: Option<String>,
        client_id: Option<String>,
    ) -> Self {
        let header_token = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|s| s.trim().to_string());

        Self {
            token: header_token.or(token),
            client_id,
        }
    }
}

/// Resolves the identity of a connection.
pub trait IdentityProvider: Send + Sync {
    /// The `client_id` for these credentials, or `None` to reject.
    fn identify(&self, credentials: &Credentials) -> Option<String>;
}

/// Fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl IdentityProvider for StaticTokens {
    fn identify(&self, credentials: &Credentials) -> Option<String> {
        let token = credentials.token.as_deref()?;
        self.tokens.get(token).cloned()
    }
}

/// Development identity: trust whatever `client_id` the connection claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustClientId;

impl IdentityProvider for TrustClientId {
    fn identify(&self, credentials: &Credentials) -> Option<String> {
        credentials
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

/// Build the identity provider the configuration asks for.
pub fn identity_from_config(config: &Config) -> Arc<dyn IdentityProvider> {
    if config.is_development_identity() {
        Arc::new(TrustClientId)
    } else {
        Arc::new(StaticTokens::new(config.auth_tokens.clone()))
    }
}

/// Decides who may watch which document.
pub trait AccessPolicy: Send + Sync {
    fn may_watch(&self, client_id: &str, document_id: &str) -> bool;
}

/// Every client may watch every document.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn may_watch(&self, _client_id: &str, _document_id: &str) -> bool {
        true
    }
}
