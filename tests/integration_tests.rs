//! Integration tests against a real SQL Server.
//!
//! These tests support two modes:
//! 1. **Testcontainers** (default): Automatically spins up a SQL Server container
//! 2. **External server**: Connect to an existing server via the MSSQL_HOST env var
//!
//! ## Running with testcontainers (requires Docker):
//! ```bash
//! cargo test --test integration_tests -- --ignored --test-threads=1
//! ```
//!
//! ## Running against an external server:
//! ```bash
//! MSSQL_HOST=localhost MSSQL_PORT=1433 MSSQL_PASSWORD='yourPass' \
//!   cargo test --test integration_tests -- --ignored --test-threads=1
//! ```
//!
//! Note: SQL Server container requires ~2GB RAM and takes 30-60 seconds to start.

use serial_test::serial;
use std::time::Duration;
use tenant_sql_guard::config::{AuthConfig, DatabaseConfig};
use tenant_sql_guard::coordinator::SizeBucket;
use tenant_sql_guard::database::{create_connection, SqlValue};
use tenant_sql_guard::security::{ParameterBinder, QueryValidator};
use tenant_sql_guard::{FailureKind, MssqlDriver, QueryCoordinator};
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mssql_server::MssqlServer;

/// Default SA password for testcontainers.
const DEFAULT_SA_PASSWORD: &str = "yourStrong(!)Password";

/// Default SQL Server image tag.
const DEFAULT_VERSION: &str = "2022-latest";

const ALICE: i64 = 1;
const BOB: i64 = 2;

/// Check if we should use an external server (vs testcontainers).
fn use_external_server() -> bool {
    std::env::var("MSSQL_HOST").is_ok()
}

/// Test database connection source.
#[allow(dead_code)] // Variants held for lifetime management (Drop trait)
enum TestDatabaseSource {
    External,
    Container(Box<ContainerAsync<MssqlServer>>),
}

/// Helper struct to manage the test database.
struct TestDatabase {
    #[allow(dead_code)] // Held for lifetime management (Drop trait on Container)
    source: TestDatabaseSource,
    config: DatabaseConfig,
}

impl TestDatabase {
    /// Uses an external server if MSSQL_HOST is set, otherwise testcontainers.
    async fn new() -> Self {
        let db = if use_external_server() {
            Self::from_external()
        } else {
            Self::from_testcontainer().await
        };
        db.seed().await;
        db
    }

    fn from_external() -> Self {
        let host = std::env::var("MSSQL_HOST").expect("MSSQL_HOST must be set");
        let port = std::env::var("MSSQL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(1433);
        let password =
            std::env::var("MSSQL_PASSWORD").unwrap_or_else(|_| DEFAULT_SA_PASSWORD.to_string());

        eprintln!("Using external SQL Server at {}:{}", host, port);
        Self {
            source: TestDatabaseSource::External,
            config: test_config(host, port, password),
        }
    }

    async fn from_testcontainer() -> Self {
        let version =
            std::env::var("MSSQL_TEST_VERSION").unwrap_or_else(|_| DEFAULT_VERSION.to_string());
        eprintln!("Starting SQL Server {} container via testcontainers...", version);

        let container = MssqlServer::default()
            .with_accept_eula()
            .with_tag(version.as_str())
            .start()
            .await
            .unwrap_or_else(|e| panic!("Failed to start SQL Server {} container: {}", version, e));

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(1433)
            .await
            .expect("Failed to get port");

        // Wait a bit for SQL Server to fully initialize
        tokio::time::sleep(Duration::from_secs(5)).await;

        Self {
            source: TestDatabaseSource::Container(Box::new(container)),
            config: test_config(host.to_string(), port, DEFAULT_SA_PASSWORD.to_string()),
        }
    }

    /// Create and fill the tables the tests query.
    async fn seed(&self) {
        let mut client = create_connection(&self.config)
            .await
            .expect("Failed to connect to SQL Server");

        client
            .simple_query(
                "IF OBJECT_ID('dbo.guard_orders') IS NOT NULL DROP TABLE dbo.guard_orders; \
                 IF OBJECT_ID('dbo.guard_events') IS NOT NULL DROP TABLE dbo.guard_events; \
                 CREATE TABLE dbo.guard_events ( \
                     id INT IDENTITY PRIMARY KEY, \
                     user_id BIGINT NOT NULL, \
                     label NVARCHAR(100) NOT NULL, \
                     created_at DATETIME2 NOT NULL); \
                 CREATE TABLE dbo.guard_orders ( \
                     id INT IDENTITY PRIMARY KEY, \
                     event_id INT NOT NULL, \
                     user_id BIGINT NOT NULL); \
                 INSERT INTO dbo.guard_events (user_id, label, created_at) VALUES \
                     (1, N'50% off', '2024-03-01T12:30:00'), \
                     (1, N'500 off', '2024-03-02T08:00:00'), \
                     (1, N'%s promo', '2024-03-03T09:15:00'), \
                     (2, N'50% off', '2024-03-04T10:00:00'); \
                 INSERT INTO dbo.guard_orders (event_id, user_id) VALUES (1, 1), (4, 2);",
            )
            .await
            .expect("Seed failed")
            .into_results()
            .await
            .expect("Seed results failed");
    }

    fn coordinator(&self) -> QueryCoordinator<MssqlDriver> {
        QueryCoordinator::new(
            QueryValidator::default(),
            ParameterBinder::default(),
            MssqlDriver::new(self.config.clone()),
        )
    }
}

fn test_config(host: String, port: u16, password: String) -> DatabaseConfig {
    let mut config = DatabaseConfig::new(
        host,
        port,
        AuthConfig {
            username: "sa".to_string(),
            password,
        },
    );
    config.trust_server_certificate = true;
    config
}

// =============================================================================
// Pipeline Tests
// =============================================================================

mod pipeline_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_rows_scoped_to_user() {
        let db = TestDatabase::new().await;
        let coord = db.coordinator();

        let outcome = coord
            .execute_one(
                "SELECT id, label FROM dbo.guard_events WHERE user_id = {user_id}",
                BOB,
            )
            .await;

        let rows = outcome.result.expect("Query failed");
        assert_eq!(rows.row_count, 1);
        assert_eq!(
            rows.rows[0].get("label"),
            Some(&SqlValue::String("50% off".to_string()))
        );
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_percent_literal_matches_exactly() {
        let db = TestDatabase::new().await;
        let coord = db.coordinator();

        let outcome = coord
            .execute_one(
                "SELECT id FROM dbo.guard_events WHERE user_id = {user_id} AND label = '50% off'",
                ALICE,
            )
            .await;

        assert_eq!(outcome.result.expect("Query failed").row_count, 1);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_placeholder_text_in_literal_is_data() {
        let db = TestDatabase::new().await;
        let coord = db.coordinator();

        let outcome = coord
            .execute_one(
                "SELECT id FROM dbo.guard_events WHERE label LIKE '%s%' AND user_id = {user_id}",
                ALICE,
            )
            .await;

        assert_eq!(outcome.result.expect("Query failed").row_count, 1);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_join_binds_user_twice() {
        let db = TestDatabase::new().await;
        let coord = db.coordinator();

        let outcome = coord
            .execute_one(
                "SELECT e.label FROM dbo.guard_events e \
                 JOIN dbo.guard_orders o ON o.event_id = e.id AND o.user_id = {user_id} \
                 WHERE e.user_id = {user_id}",
                ALICE,
            )
            .await;

        let rows = outcome.result.expect("Query failed");
        assert_eq!(rows.row_count, 1);
        assert_eq!(rows.columns, vec!["label"]);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_datetime_normalized_to_iso_text() {
        let db = TestDatabase::new().await;
        let coord = db.coordinator();

        let outcome = coord
            .execute_one(
                "SELECT created_at FROM dbo.guard_events WHERE user_id = {user_id} AND label = '50% off'",
                ALICE,
            )
            .await;

        let rows = outcome.result.expect("Query failed");
        assert_eq!(
            rows.rows[0].get("created_at"),
            Some(&SqlValue::String("2024-03-01T12:30:00".to_string()))
        );
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_estimate_counts_rows() {
        let db = TestDatabase::new().await;
        let coord = db.coordinator();

        let estimate = coord
            .estimate("SELECT id FROM dbo.guard_events WHERE user_id = {user_id}", ALICE)
            .await;

        let stats = estimate.result.expect("Estimate failed");
        assert_eq!(stats.total_rows, 3);
        assert_eq!(stats.estimated_size, SizeBucket::Small);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_missing_table_is_execution_failure() {
        let db = TestDatabase::new().await;
        let coord = db.coordinator();

        let outcome = coord
            .execute_one("SELECT * FROM dbo.no_such_table WHERE user_id = {user_id}", ALICE)
            .await;

        let err = outcome.result.expect_err("Query should fail");
        assert_eq!(err.kind(), FailureKind::Execution);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_row_limit_truncates() {
        let db = TestDatabase::new().await;
        let coord = QueryCoordinator::new(
            QueryValidator::default(),
            ParameterBinder::default(),
            MssqlDriver::new(db.config.clone()).with_max_rows(2),
        );

        let outcome = coord
            .execute_one("SELECT id FROM dbo.guard_events WHERE user_id = {user_id}", ALICE)
            .await;

        let rows = outcome.result.expect("Query failed");
        assert_eq!(rows.row_count, 2);
        assert!(rows.truncated);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_ping_opens_connection() {
        let db = TestDatabase::new().await;
        let driver = MssqlDriver::new(db.config.clone());

        driver.ping().await.expect("Ping failed");
        assert!(driver.is_connected().await);
    }
}
