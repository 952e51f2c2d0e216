//! Error types for the SQL guard.
//!
//! `ServerError` covers configuration and everything that can go wrong at or
//! below the database driver, with SQL Server error code mapping for
//! user-friendly messages. `PipelineError` is the per-request failure value
//! returned by the coordinator.

use crate::security::{BinderInvariantViolation, MalformedLiteral, RejectionReason};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Infrastructure and driver errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Database not found
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// Object not found (table, view, column)
    #[error("{object_type} not found: {name}")]
    ObjectNotFound { object_type: String, name: String },

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Query execution error
    #[error("Query execution error: {message}")]
    QueryExecution {
        message: String,
        sql_error_code: Option<i32>,
    },

    /// Query timeout
    #[error("Query timeout: operation exceeded {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an authentication error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an object not found error.
    pub fn object_not_found(object_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            object_type: object_type.into(),
            name: name.into(),
        }
    }

    /// Create a permission denied error.
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a query execution error.
    pub fn query_error(msg: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: msg.into(),
            sql_error_code: None,
        }
    }

    /// Create a query execution error with a SQL Server error number.
    pub fn query_error_with_code(msg: impl Into<String>, code: i32) -> Self {
        Self::QueryExecution {
            message: msg.into(),
            sql_error_code: Some(code),
        }
    }

    /// Create a timeout error.
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout {
            timeout_seconds: seconds,
        }
    }

    /// Check if this error is transient and may succeed on a fresh connection.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::QueryExecution {
                sql_error_code: Some(code),
                ..
            } => is_transient_sql_error(*code),
            _ => false,
        }
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check your environment variables and configuration"),
            Self::Connection { .. } => {
                Some("Check server hostname, port, and network connectivity")
            }
            Self::Authentication(_) => Some("Verify your username and password are correct"),
            Self::DatabaseNotFound(_) => Some("Check the database name and ensure it exists"),
            Self::ObjectNotFound { .. } => Some("Check the table and column names in the question"),
            Self::PermissionDenied(_) => {
                Some("Request appropriate permissions from your database administrator")
            }
            Self::Timeout { .. } => Some("Try a narrower question or increase the timeout limit"),
            _ => None,
        }
    }
}

/// Map SQL Server error numbers to semantic ServerError types.
pub fn from_sql_error(code: i32, message: &str) -> ServerError {
    match code {
        18456 => ServerError::auth(format!("Login failed: {}", message)),

        4060 => ServerError::DatabaseNotFound(message.to_string()),

        208 => ServerError::object_not_found("Object", message),

        229 | 230 => ServerError::permission_denied(message),

        -2 => ServerError::timeout(0),

        -1 => ServerError::connection("Connection broken"),
        53 => ServerError::connection("Server not found or not accessible"),

        102 => ServerError::query_error_with_code(format!("Syntax error: {}", message), code),
        207 => ServerError::query_error_with_code(format!("Invalid column: {}", message), code),

        1205 => ServerError::query_error_with_code(
            "Transaction was deadlocked and has been rolled back",
            code,
        ),

        _ => ServerError::query_error_with_code(message, code),
    }
}

/// Check if a SQL Server error number indicates a transient error.
fn is_transient_sql_error(code: i32) -> bool {
    matches!(
        code,
        -2      // Timeout
        | -1    // Connection broken
        | 1205  // Deadlock
        | 10053 // Connection forcibly closed
        | 10054 // Connection reset
        | 10060 // Connection timed out
        | 40501 // Azure: service busy
        | 40613 // Azure: database unavailable
    )
}

impl From<tiberius::error::Error> for ServerError {
    fn from(e: tiberius::error::Error) -> Self {
        use tiberius::error::Error;

        match &e {
            Error::Server(token) => from_sql_error(token.code() as i32, token.message()),
            Error::Io { .. } => ServerError::connection(format!("IO error: {}", e)),
            Error::Tls(_) => ServerError::connection(format!("TLS error: {}", e)),
            Error::Routing { .. } => ServerError::connection(e.to_string()),
            Error::Protocol(_) => ServerError::connection(format!("Protocol error: {}", e)),
            _ => ServerError::query_error(e.to_string()),
        }
    }
}

/// Coarse classification of a failed request, exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The query was blocked before reaching the driver.
    Security,
    /// The driver failed while running an accepted query.
    Execution,
    /// A defect inside the guard itself.
    Internal,
}

/// Failure of a single request flowing through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The structural validator declined the query.
    #[error("Query blocked for security: {0}")]
    Security(#[from] RejectionReason),

    /// The escaper could not determine literal boundaries.
    #[error("Query blocked for security: {0}")]
    MalformedLiteral(#[from] MalformedLiteral),

    /// Placeholder/parameter mismatch after binding.
    #[error("Internal error: {0}")]
    BinderInvariant(#[from] BinderInvariantViolation),

    /// The database driver failed.
    #[error("Database error: {0}")]
    Driver(#[from] ServerError),
}

impl PipelineError {
    /// Classify this failure for the caller.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Security(_) | Self::MalformedLiteral(_) => FailureKind::Security,
            Self::Driver(_) => FailureKind::Execution,
            Self::BinderInvariant(_) => FailureKind::Internal,
        }
    }

    /// Remediation hint for driver failures.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Driver(e) => e.suggestion(),
            _ => None,
        }
    }

    /// Whether the driver was never contacted for this failure.
    pub fn is_rejection(&self) -> bool {
        self.kind() == FailureKind::Security
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_mapping() {
        let err = from_sql_error(18456, "Login failed for user 'test'");
        assert!(matches!(err, ServerError::Authentication(_)));

        let err = from_sql_error(208, "Invalid object name 'foo'");
        assert!(matches!(err, ServerError::ObjectNotFound { .. }));

        let err = from_sql_error(229, "SELECT permission denied");
        assert!(matches!(err, ServerError::PermissionDenied(_)));

        let err = from_sql_error(50000, "custom");
        assert!(matches!(
            err,
            ServerError::QueryExecution {
                sql_error_code: Some(50000),
                ..
            }
        ));
    }

    #[test]
    fn test_transient_errors() {
        assert!(ServerError::timeout(30).is_transient());
        assert!(ServerError::connection("test").is_transient());
        assert!(from_sql_error(1205, "deadlock").is_transient());
        assert!(!ServerError::auth("test").is_transient());
        assert!(!from_sql_error(102, "near 'FORM'").is_transient());
    }

    #[test]
    fn test_error_suggestions() {
        assert!(ServerError::auth("Login failed").suggestion().is_some());
        assert!(ServerError::query_error("x").suggestion().is_none());
    }

    #[test]
    fn test_pipeline_error_classification() {
        let err = PipelineError::from(RejectionReason::NotASelect);
        assert_eq!(err.kind(), FailureKind::Security);
        assert!(err.is_rejection());
        assert!(err.to_string().starts_with("Query blocked for security"));

        let err = PipelineError::from(ServerError::timeout(5));
        assert_eq!(err.kind(), FailureKind::Execution);
        assert!(err.to_string().starts_with("Database error"));
        assert!(err.suggestion().is_some());
        assert!(PipelineError::from(RejectionReason::NotASelect)
            .suggestion()
            .is_none());

        let err = PipelineError::from(BinderInvariantViolation {
            placeholders: 2,
            parameters: 1,
        });
        assert_eq!(err.kind(), FailureKind::Internal);
        assert!(!err.is_rejection());
    }
}
