//! # Tenant SQL Guard
//!
//! Safety and parameterization layer for model-generated SQL against a
//! per-user partitioned SQL Server database.
//!
//! This crate provides:
//! - **Validation**: lexical checks that only read-only, single-statement,
//!   user-scoped `SELECT` queries are accepted
//! - **Escaping**: `%` inside string literals is doubled so it can never be
//!   read as a placeholder
//! - **Binding**: the `{user_id}` marker becomes a positional placeholder and
//!   the caller's id is bound once per occurrence
//! - **Coordination**: single, batch (fail-fast), syntax-only and row-count
//!   estimate requests over a pluggable [`database::QueryDriver`]
//!
//! ## Example
//!
//! ```
//! use tenant_sql_guard::security::{escape, ParameterBinder, QueryValidator};
//!
//! let query = "SELECT * FROM events WHERE user_id = {user_id} AND label = '50% off'";
//! assert!(QueryValidator::default().validate(query, 7).is_safe());
//!
//! let escaped = escape(query).unwrap();
//! let bound = ParameterBinder::default().bind(&escaped, 7).unwrap();
//! assert_eq!(
//!     bound.template(),
//!     "SELECT * FROM events WHERE user_id = %s AND label = '50%% off'"
//! );
//! assert_eq!(bound.parameters(), &[7]);
//! ```

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod security;
pub mod telemetry;
pub mod transport;

/// Identifier of the user a query is scoped to.
pub type UserId = i64;

pub use config::Config;
pub use coordinator::{BatchOutcome, ExecutionOutcome, QueryCoordinator};
pub use database::{MssqlDriver, QueryDriver};
pub use error::{FailureKind, PipelineError, ServerError};
