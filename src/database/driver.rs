//! Driver seam between the pipeline and the database.
//!
//! The coordinator only ever hands a [`ParameterizedQuery`] to a
//! [`QueryDriver`]; the driver turns the `%s` template into its own
//! placeholder syntax and binds the parameters.

use super::auth::{create_connection, truncate_for_log, RawConnection};
use super::query::{collect_stream, QueryResult};
use crate::config::{Config, DatabaseConfig};
use crate::constants::{DEFAULT_MAX_RESULT_ROWS, DEFAULT_QUERY_TIMEOUT, LOG_QUERY_TRUNCATE_LENGTH};
use crate::error::ServerError;
use crate::security::ParameterizedQuery;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiberius::Query;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Executes parameterized queries.
///
/// Implementations own their concurrency discipline; the coordinator may call
/// `dispatch` from any number of tasks.
pub trait QueryDriver: Send + Sync {
    /// Execute the template with its bound parameters.
    fn dispatch(
        &self,
        query: &ParameterizedQuery,
    ) -> impl Future<Output = Result<QueryResult, ServerError>> + Send;
}

impl<D: QueryDriver> QueryDriver for Arc<D> {
    fn dispatch(
        &self,
        query: &ParameterizedQuery,
    ) -> impl Future<Output = Result<QueryResult, ServerError>> + Send {
        (**self).dispatch(query)
    }
}

/// Render a template into SQL Server's `@P1..@Pn` placeholders.
pub fn render_for_mssql(query: &ParameterizedQuery) -> String {
    query.render_with(|n| format!("@P{}", n))
}

/// SQL Server driver over a single lazily opened tiberius connection.
///
/// Requests are serialized on the connection. A transient failure (broken
/// connection, timeout, deadlock) drops the connection and the next dispatch
/// reconnects.
pub struct MssqlDriver {
    config: DatabaseConfig,
    query_timeout: Duration,
    max_rows: usize,
    connection: Mutex<Option<RawConnection>>,
}

impl MssqlDriver {
    /// Create a driver. No connection is opened until the first dispatch.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            max_rows: DEFAULT_MAX_RESULT_ROWS,
            connection: Mutex::new(None),
        }
    }

    /// Create a driver using the database, timeout and row-limit settings.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.database.clone())
            .with_query_timeout(config.query.timeout)
            .with_max_rows(config.security.max_result_rows)
    }

    /// Set the per-query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the maximum number of rows kept per result.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Get the per-query timeout.
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Get the row limit.
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Check whether a connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Open the connection if needed and run `SELECT 1`.
    pub async fn ping(&self) -> Result<(), ServerError> {
        let mut guard = self.connection.lock().await;
        let conn = Self::connected(&mut guard, &self.config).await?;
        let check = match conn.simple_query("SELECT 1").await {
            Ok(stream) => stream.into_row().await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = check {
            *guard = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn connected<'a>(
        slot: &'a mut Option<RawConnection>,
        config: &DatabaseConfig,
    ) -> Result<&'a mut RawConnection, ServerError> {
        if slot.is_none() {
            *slot = Some(create_connection(config).await?);
        }
        slot.as_mut()
            .ok_or_else(|| ServerError::connection("Connection unavailable"))
    }

    async fn execute(&self, query: &ParameterizedQuery) -> Result<QueryResult, ServerError> {
        let sql = render_for_mssql(query);
        debug!(
            parameters = query.parameters().len(),
            "Dispatching: {}",
            truncate_for_log(&sql, LOG_QUERY_TRUNCATE_LENGTH)
        );

        let mut guard = self.connection.lock().await;
        let conn = Self::connected(&mut guard, &self.config).await?;

        let mut statement = Query::new(sql);
        for value in query.parameters() {
            statement.bind(*value);
        }

        let start = Instant::now();
        let max_rows = self.max_rows;
        let run = async move {
            let stream = statement.query(conn).await?;
            collect_stream(stream, max_rows, start).await
        };

        let result = match tokio::time::timeout(self.query_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(ServerError::timeout(self.query_timeout.as_secs())),
        };

        match &result {
            Ok(rows) => debug!(
                "Query completed: {} rows in {} ms",
                rows.row_count(),
                rows.execution_time_ms
            ),
            Err(e) if e.is_transient() => {
                warn!("Transient driver failure, dropping connection: {}", e);
                *guard = None;
            }
            Err(_) => {}
        }

        result
    }
}

impl QueryDriver for MssqlDriver {
    fn dispatch(
        &self,
        query: &ParameterizedQuery,
    ) -> impl Future<Output = Result<QueryResult, ServerError>> + Send {
        self.execute(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::security::{escape, ParameterBinder};

    fn bound(query: &str) -> ParameterizedQuery {
        ParameterBinder::default()
            .bind(&escape(query).unwrap(), 11)
            .unwrap()
    }

    fn unreachable_driver() -> MssqlDriver {
        let mut config = DatabaseConfig::new(
            "127.0.0.1",
            1,
            AuthConfig {
                username: "sa".into(),
                password: "x".into(),
            },
        );
        config.connection_timeout = Duration::from_secs(2);
        MssqlDriver::new(config)
    }

    #[test]
    fn test_render_for_mssql() {
        let query = bound(
            "SELECT name FROM t WHERE user_id = {user_id} AND name LIKE 'a%' AND owner = {user_id}",
        );
        assert_eq!(
            render_for_mssql(&query),
            "SELECT name FROM t WHERE user_id = @P1 AND name LIKE 'a%' AND owner = @P2"
        );
    }

    #[test]
    fn test_render_keeps_literal_placeholder_text() {
        let query = bound("SELECT * FROM t WHERE note = '%s' AND user_id = {user_id}");
        assert_eq!(
            render_for_mssql(&query),
            "SELECT * FROM t WHERE note = '%s' AND user_id = @P1"
        );
    }

    #[test]
    fn test_builder_settings() {
        let driver = unreachable_driver()
            .with_query_timeout(Duration::from_secs(3))
            .with_max_rows(25);
        assert_eq!(driver.query_timeout(), Duration::from_secs(3));
        assert_eq!(driver.max_rows(), 25);
    }

    #[tokio::test]
    async fn test_lazy_connect_and_connection_error() {
        let driver = unreachable_driver();
        assert!(!driver.is_connected().await);

        let err = driver
            .dispatch(&bound("SELECT * FROM t WHERE user_id = {user_id}"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Connection { .. }));
        assert!(!driver.is_connected().await);
    }

    #[tokio::test]
    async fn test_driver_behind_arc() {
        let driver = Arc::new(unreachable_driver());
        let result = driver
            .dispatch(&bound("SELECT * FROM t WHERE user_id = {user_id}"))
            .await;
        assert!(result.is_err());
    }
}
