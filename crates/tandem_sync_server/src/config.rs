use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// `DATABASE_PATH` value selecting the non-durable in-memory history.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3030)
    pub port: u16,
    /// History database file path (default: ./tandem_history.db)
    pub database_path: PathBuf,
    /// Submissions that may queue on one document before overload (default: 64)
    pub max_pending_per_document: usize,
    /// Revisions between content snapshots, 0 disables (default: 100)
    pub snapshot_interval: u64,
    /// Messages buffered per connection before it is dropped (default: 256)
    pub outbound_queue_capacity: usize,
    /// Bearer token -> client id. Empty means development identity.
    pub auth_tokens: HashMap<String, String>,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "0.0.0.0");
        let port = var("PORT", "3030")
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_path = PathBuf::from(var("DATABASE_PATH", "./tandem_history.db"));

        let max_pending_per_document: usize = parse_number(
            "MAX_PENDING_PER_DOCUMENT",
            &var("MAX_PENDING_PER_DOCUMENT", "64"),
        )?;
        if max_pending_per_document == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "MAX_PENDING_PER_DOCUMENT",
                value: "0".to_string(),
            });
        }
        let snapshot_interval = parse_number("SNAPSHOT_INTERVAL", &var("SNAPSHOT_INTERVAL", "100"))?;
        let outbound_queue_capacity: usize = parse_number(
            "OUTBOUND_QUEUE_CAPACITY",
            &var("OUTBOUND_QUEUE_CAPACITY", "256"),
        )?;
        if outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "OUTBOUND_QUEUE_CAPACITY",
                value: "0".to_string(),
            });
        }

        let auth_tokens = parse_tokens(&var("AUTH_TOKENS", ""))?;

        let cors_origins = var("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host,
            port,
            database_path,
            max_pending_per_document,
            snapshot_interval,
            outbound_queue_capacity,
            auth_tokens,
            cors_origins,
        })
    }

    /// Whether history lives only in memory
    pub fn uses_memory_store(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_DATABASE
    }

    /// Whether connections identify themselves without a token
    pub fn is_development_identity(&self) -> bool {
        self.auth_tokens.is_empty()
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}

/// Parse `token=client_id,token=client_id`.
fn parse_tokens(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((token, client)) if !token.trim().is_empty() && !client.trim().is_empty() => {
                Ok((token.trim().to_string(), client.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidAuthToken(pair.to_string())),
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid PORT environment variable")]
    InvalidPort,
    #[error("Invalid {name} environment variable: '{value}'")]
    InvalidNumber { name: &'static str, value: String },
    #[error("Invalid AUTH_TOKENS entry '{0}', expected token=client_id")]
    InvalidAuthToken(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.server_addr(), "0.0.0.0:3030");
        assert_eq!(config.database_path, PathBuf::from("./tandem_history.db"));
        assert_eq!(config.max_pending_per_document, 64);
        assert_eq!(config.snapshot_interval, 100);
        assert_eq!(config.outbound_queue_capacity, 256);
        assert!(config.is_development_identity());
        assert!(!config.uses_memory_store());
    }

    #[test]
    fn test_overrides() {
        let config = config_with(&[
            ("PORT", "8080"),
            ("DATABASE_PATH", ":memory:"),
            ("SNAPSHOT_INTERVAL", "0"),
            ("AUTH_TOKENS", "s3cret=alice, other=bob"),
            ("CORS_ORIGINS", "https://a.example, ,https://b.example"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert!(config.uses_memory_store());
        assert_eq!(config.snapshot_interval, 0);
        assert_eq!(config.auth_tokens.get("s3cret").map(String::as_str), Some("alice"));
        assert_eq!(config.auth_tokens.get("other").map(String::as_str), Some("bob"));
        assert_eq!(config.cors_origins.len(), 2);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(config_with(&[("PORT", "http")]), Err(ConfigError::InvalidPort)));
        assert!(matches!(
            config_with(&[("MAX_PENDING_PER_DOCUMENT", "0")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            config_with(&[("SNAPSHOT_INTERVAL", "-1")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            config_with(&[("AUTH_TOKENS", "lonely")]),
            Err(ConfigError::InvalidAuthToken(_))
        ));
    }
}
