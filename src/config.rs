//! Configuration management for the SQL guard.
//!
//! Configuration is loaded from environment variables following the 12-factor app pattern.

use crate::constants::{
    DEFAULT_CONNECTION_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_MAX_QUERY_LENGTH,
    DEFAULT_MAX_RESULT_ROWS, DEFAULT_QUERY_TIMEOUT, DEFAULT_QUERY_TIMEOUT_SECS,
};
use crate::error::ServerError;
use crate::security::ValidationMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Guard configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database connection configuration
    pub database: DatabaseConfig,

    /// Validation configuration
    pub security: SecurityConfig,

    /// Query execution configuration
    pub query: QueryConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQL Server hostname or IP address
    pub host: String,

    /// SQL Server port (default: 1433)
    pub port: u16,

    /// Database name (optional, uses the login's default database when unset)
    pub database: Option<String>,

    /// SQL Server login
    pub auth: AuthConfig,

    /// Enable TLS encryption
    pub encrypt: bool,

    /// Trust server certificate (for self-signed certs)
    pub trust_server_certificate: bool,

    /// Application name sent to SQL Server
    pub application_name: String,

    /// Connection timeout
    pub connection_timeout: Duration,
}

/// SQL Server authentication (username/password).
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Query validation mode
    pub validation_mode: ValidationMode,

    /// Maximum query length (bytes)
    pub max_query_length: usize,

    /// Maximum result rows per query
    pub max_result_rows: usize,
}

/// Query execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Query timeout
    pub timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Required
    /// - `MSSQL_HOST`: SQL Server hostname
    /// - `MSSQL_USER`: SQL Server username
    /// - `MSSQL_PASSWORD`: SQL Server password
    ///
    /// ## Optional
    /// - `MSSQL_PORT`: Port number (default: 1433)
    /// - `MSSQL_DATABASE`: Database name
    /// - `MSSQL_ENCRYPT`: Enable TLS (default: true)
    /// - `MSSQL_TRUST_CERT`: Trust server certificate (default: false)
    /// - `MSSQL_CONNECT_TIMEOUT`: Connection timeout in seconds (default: 30)
    /// - `MSSQL_QUERY_TIMEOUT`: Query timeout in seconds (default: 30)
    /// - `MSSQL_MAX_ROWS`: Maximum result rows (default: 10000)
    /// - `GUARD_VALIDATION_MODE`: `standard` or `strict` (default: strict)
    /// - `GUARD_MAX_QUERY_LENGTH`: Maximum query length in bytes (default: 1000000)
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// `from_env` is this function over the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        // Required: Host
        let host = lookup("MSSQL_HOST")
            .ok_or_else(|| ServerError::config("MSSQL_HOST environment variable is required"))?;

        let auth = match (lookup("MSSQL_USER"), lookup("MSSQL_PASSWORD")) {
            (Some(username), Some(password)) => AuthConfig { username, password },
            (Some(_), None) => {
                return Err(ServerError::config(
                    "MSSQL_PASSWORD is required when MSSQL_USER is set",
                ))
            }
            (None, Some(_)) => {
                return Err(ServerError::config(
                    "MSSQL_USER is required when MSSQL_PASSWORD is set",
                ))
            }
            (None, None) => {
                return Err(ServerError::config(
                    "Authentication required: set MSSQL_USER and MSSQL_PASSWORD",
                ))
            }
        };

        let port = lookup("MSSQL_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(1433);

        let database = lookup("MSSQL_DATABASE").filter(|d| !d.trim().is_empty());

        let encrypt = lookup("MSSQL_ENCRYPT")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        let trust_server_certificate = lookup("MSSQL_TRUST_CERT")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        let connection_timeout_secs = lookup("MSSQL_CONNECT_TIMEOUT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_SECS);

        let query_timeout_secs = lookup("MSSQL_QUERY_TIMEOUT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);

        let validation_mode = match lookup("GUARD_VALIDATION_MODE") {
            Some(raw) => ValidationMode::parse(&raw).ok_or_else(|| {
                ServerError::config(format!(
                    "GUARD_VALIDATION_MODE must be 'standard' or 'strict', got '{}'",
                    raw
                ))
            })?,
            None => ValidationMode::default(),
        };

        let max_query_length = lookup("GUARD_MAX_QUERY_LENGTH")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_MAX_QUERY_LENGTH);

        let max_result_rows = lookup("MSSQL_MAX_ROWS")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_MAX_RESULT_ROWS);

        Ok(Config {
            database: DatabaseConfig {
                host,
                port,
                database,
                auth,
                encrypt,
                trust_server_certificate,
                application_name: "tenant-sql-guard".to_string(),
                connection_timeout: Duration::from_secs(connection_timeout_secs),
            },
            security: SecurityConfig {
                validation_mode,
                max_query_length,
                max_result_rows,
            },
            query: QueryConfig {
                timeout: Duration::from_secs(query_timeout_secs),
            },
        })
    }

    /// Get the configured database name, if any.
    pub fn current_database(&self) -> Option<&str> {
        self.database.database.as_deref()
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

impl DatabaseConfig {
    /// Create a connection configuration with default transport settings.
    pub fn new(host: impl Into<String>, port: u16, auth: AuthConfig) -> Self {
        Self {
            host: host.into(),
            port,
            database: None,
            auth,
            encrypt: true,
            trust_server_certificate: false,
            application_name: "tenant-sql-guard".to_string(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            validation_mode: ValidationMode::default(),
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            max_result_rows: DEFAULT_MAX_RESULT_ROWS,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}
