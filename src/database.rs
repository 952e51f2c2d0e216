//! Database connectivity and query dispatch.

mod auth;
mod driver;
mod query;
pub mod types;

pub use auth::{create_connection, truncate_for_log, RawConnection};
pub use driver::{render_for_mssql, MssqlDriver, QueryDriver};
pub use query::{ColumnInfo, QueryResult, ResultRow};
pub use types::{SqlValue, TypeMapper};
