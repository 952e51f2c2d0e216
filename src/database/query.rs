//! Query results and stream collection.

use crate::database::types::{SqlValue, TypeMapper};
use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tiberius::QueryStream;

/// A single row of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Column values indexed by column name.
    #[serde(flatten)]
    pub columns: HashMap<String, SqlValue>,
}

impl ResultRow {
    /// Create a new result row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    /// Insert a value.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.insert(column.into(), value);
    }

    /// Convert every date/time value to its ISO-8601 text.
    pub fn normalized(self) -> Self {
        Self {
            columns: self
                .columns
                .into_iter()
                .map(|(name, value)| (name, value.normalized()))
                .collect(),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, SqlValue)> for ResultRow {
    fn from_iter<I: IntoIterator<Item = (K, SqlValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Information about a result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// SQL type name.
    pub sql_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// Result of a query execution as returned by a driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Columns in result order.
    pub columns: Vec<ColumnInfo>,

    /// Result rows.
    pub rows: Vec<ResultRow>,

    /// Execution time in milliseconds.
    pub execution_time_ms: u64,

    /// Whether results were truncated due to row limit.
    pub truncated: bool,
}

impl QueryResult {
    /// Create an empty query result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a result from columns and rows.
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<ResultRow>) -> Self {
        Self {
            columns,
            rows,
            execution_time_ms: 0,
            truncated: false,
        }
    }

    /// Number of rows returned.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column names in result order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Get the first value of the first row, used for scalar queries.
    pub fn scalar(&self, column: &str) -> Option<&SqlValue> {
        self.rows.first().and_then(|row| row.get(column))
    }

    /// Normalize every row (date/time values become ISO-8601 text).
    pub fn normalized(self) -> Self {
        Self {
            rows: self.rows.into_iter().map(ResultRow::normalized).collect(),
            ..self
        }
    }
}

/// Drain a tiberius stream into a [`QueryResult`], keeping at most `max_rows`.
///
/// Rows past the limit are read and discarded so the connection is left
/// ready for the next request.
pub(crate) async fn collect_stream(
    mut stream: QueryStream<'_>,
    max_rows: usize,
    start: Instant,
) -> Result<QueryResult, ServerError> {
    use futures_util::stream::TryStreamExt;

    let mut columns: Vec<ColumnInfo> = Vec::new();
    let mut rows: Vec<ResultRow> = Vec::new();
    let mut truncated = false;

    while let Some(item) = stream.try_next().await? {
        match item {
            tiberius::QueryItem::Metadata(meta) => {
                columns = meta
                    .columns()
                    .iter()
                    .map(|col| ColumnInfo::new(col.name(), TypeMapper::sql_type_name(col)))
                    .collect();
            }
            tiberius::QueryItem::Row(row) => {
                if rows.len() >= max_rows {
                    truncated = true;
                    continue;
                }

                let result_row = columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| (col.name.clone(), TypeMapper::extract_column(&row, idx)))
                    .collect();
                rows.push(result_row);
            }
        }
    }

    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms: start.elapsed().as_millis() as u64,
        truncated,
    })
}
