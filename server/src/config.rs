//! Configuration management for the server.

use std::env;
use std::path::PathBuf;
use tessera_engine::Locales;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Upper bound of the connection pool
    pub database_max_connections: u32,
    /// Directory of `*.json` collection definitions
    pub collections_dir: PathBuf,
    /// Content locales, the first one is the default
    pub locales: Locales,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = var("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = var("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let database_max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidMaxConnections(raw))?,
            None => 10,
        };

        let collections_dir = var("COLLECTIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./collections"));

        let locales = Locales::parse(&var("LOCALES").unwrap_or_else(|| "en".to_string()))
            .map_err(|e| ConfigError::InvalidLocales(e.to_string()))?;

        Ok(Self {
            host,
            port,
            database_url,
            database_max_connections,
            collections_dir,
            locales,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid DATABASE_MAX_CONNECTIONS value: {0}")]
    InvalidMaxConnections(String),

    #[error("Invalid LOCALES value: {0}")]
    InvalidLocales(String),
}
