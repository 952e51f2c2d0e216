//! Connection setup for SQL Server.
//!
//! Builds a tiberius `Config` from [`DatabaseConfig`], applies SQL Server
//! authentication and performs the TCP connect plus TDS handshake under the
//! configured connection timeout.

use crate::config::{AuthConfig, DatabaseConfig};
use crate::error::ServerError;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

/// Type alias for a raw tiberius connection.
pub type RawConnection = Client<Compat<TcpStream>>;

/// Apply SQL Server authentication to a tiberius config.
pub fn configure_auth(config: &mut Config, auth: &AuthConfig) {
    config.authentication(AuthMethod::sql_server(&auth.username, &auth.password));
}

/// Create a tiberius Config from DatabaseConfig.
///
/// This sets up host, port, database and encryption but does NOT configure
/// authentication - use `configure_auth` for that.
pub fn create_base_config(db_config: &DatabaseConfig) -> Config {
    let mut config = Config::new();

    config.host(&db_config.host);
    config.port(db_config.port);

    if let Some(ref database) = db_config.database {
        config.database(database);
    }

    if db_config.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::Off);
    }

    if db_config.trust_server_certificate {
        config.trust_cert();
    }

    config.application_name(&db_config.application_name);

    config
}

/// Create a raw connection to SQL Server.
///
/// The whole flow (TCP connect and TDS handshake) is bounded by
/// `db_config.connection_timeout`.
pub async fn create_connection(db_config: &DatabaseConfig) -> Result<RawConnection, ServerError> {
    let mut config = create_base_config(db_config);
    configure_auth(&mut config, &db_config.auth);

    let address = format!("{}:{}", db_config.host, db_config.port);
    let timeout = db_config.connection_timeout;
    debug!("Creating connection to {}", address);

    let connect = async {
        let tcp = TcpStream::connect(&address).await.map_err(|e| {
            ServerError::connection_with_source(format!("Failed to connect to {}", address), e)
        })?;

        tcp.set_nodelay(true)
            .map_err(|e| ServerError::connection(format!("Failed to set TCP_NODELAY: {}", e)))?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(ServerError::from)
    };

    let client = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| {
            ServerError::connection(format!(
                "Timed out connecting to {} after {}s",
                address,
                timeout.as_secs()
            ))
        })??;

    debug!("Connection established successfully");
    Ok(client)
}

/// Truncate a string for logging purposes.
///
/// Cuts on a character boundary at or below `max_len` bytes.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db_config() -> DatabaseConfig {
        let mut config = DatabaseConfig::new(
            "localhost",
            1433,
            AuthConfig {
                username: "sa".to_string(),
                password: "test".to_string(),
            },
        );
        config.database = Some("master".to_string());
        config.encrypt = false;
        config.trust_server_certificate = true;
        config
    }

    #[test]
    fn test_create_base_config() {
        let db_config = test_db_config();
        let mut config = create_base_config(&db_config);
        configure_auth(&mut config, &db_config.auth);
        assert_eq!(config.get_addr(), "localhost:1433");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(
            truncate_for_log("this is a long string", 10),
            "this is a ..."
        );
        assert_eq!(truncate_for_log("exactly10!", 10), "exactly10!");
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        // 'é' is two bytes; a cut at byte 2 would split it.
        assert_eq!(truncate_for_log("aéb", 2), "a...");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let mut db_config = test_db_config();
        db_config.port = 1;
        db_config.connection_timeout = std::time::Duration::from_secs(2);
        let err = create_connection(&db_config).await.unwrap_err();
        assert!(matches!(err, ServerError::Connection { .. }));
    }
}
