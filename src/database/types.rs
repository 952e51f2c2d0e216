//! SQL Server type mapping to Rust types.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tiberius::{ColumnType, FromSql, Row};
use uuid::Uuid;

/// A SQL value that can be serialized to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Check if this value is a date, time or timestamp.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            SqlValue::Date(_) | SqlValue::Time(_) | SqlValue::DateTime(_) | SqlValue::DateTimeOffset(_)
        )
    }

    /// Replace date/time values with their canonical ISO-8601 text.
    ///
    /// All other values are returned unchanged.
    pub fn normalized(self) -> SqlValue {
        match self {
            SqlValue::Date(v) => SqlValue::String(v.format("%Y-%m-%d").to_string()),
            SqlValue::Time(v) => SqlValue::String(v.format("%H:%M:%S%.f").to_string()),
            SqlValue::DateTime(v) => {
                SqlValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            SqlValue::DateTimeOffset(v) => {
                SqlValue::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, false))
            }
            other => other,
        }
    }

    /// Interpret this value as a non-negative row count.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            SqlValue::U8(v) => Some(u64::from(*v)),
            SqlValue::I16(v) => u64::try_from(*v).ok(),
            SqlValue::I32(v) => u64::try_from(*v).ok(),
            SqlValue::I64(v) => u64::try_from(*v).ok(),
            SqlValue::Decimal(v) => v.to_u64(),
            _ => None,
        }
    }

    /// Convert to a display string.
    pub fn to_display_string(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::U8(v) => v.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::String(v) => v.clone(),
            SqlValue::Bytes(v) => format!("0x{}", hex::encode(v)),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Uuid(v) => v.to_string(),
            SqlValue::Date(v) => v.to_string(),
            SqlValue::Time(v) => v.to_string(),
            SqlValue::DateTime(v) => v.to_string(),
            SqlValue::DateTimeOffset(v) => v.to_rfc3339(),
        }
    }
}

/// Maps tiberius columns onto [`SqlValue`].
pub struct TypeMapper;

/// Read a column as `T`, treating NULL and conversion failures alike.
fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<T, _>(idx).ok().flatten()
}

impl TypeMapper {
    /// Extract a value using the column's declared type.
    ///
    /// Nullable integer and float columns (`Intn`, `Floatn`) do not carry
    /// their width in the type, so each width is tried in turn.
    pub fn extract_column(row: &Row, idx: usize) -> SqlValue {
        let Some(column) = row.columns().get(idx) else {
            return SqlValue::Null;
        };

        let value = match column.column_type() {
            ColumnType::Null => None,
            ColumnType::Bit | ColumnType::Bitn => get(row, idx).map(SqlValue::Bool),
            ColumnType::Int1 => get(row, idx).map(SqlValue::U8),
            ColumnType::Int2 => get(row, idx).map(SqlValue::I16),
            ColumnType::Int4 => get(row, idx).map(SqlValue::I32),
            ColumnType::Int8 => get(row, idx).map(SqlValue::I64),
            ColumnType::Intn => get(row, idx)
                .map(SqlValue::I32)
                .or_else(|| get(row, idx).map(SqlValue::I64))
                .or_else(|| get(row, idx).map(SqlValue::I16))
                .or_else(|| get(row, idx).map(SqlValue::U8)),
            ColumnType::Float4 => get(row, idx).map(SqlValue::F32),
            ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => {
                get(row, idx).map(SqlValue::F64)
            }
            ColumnType::Floatn => get(row, idx)
                .map(SqlValue::F64)
                .or_else(|| get(row, idx).map(SqlValue::F32)),
            ColumnType::Decimaln | ColumnType::Numericn => get(row, idx).map(SqlValue::Decimal),
            ColumnType::Guid => get(row, idx).map(SqlValue::Uuid),
            ColumnType::Datetime
            | ColumnType::Datetime4
            | ColumnType::Datetimen
            | ColumnType::Datetime2 => get(row, idx).map(SqlValue::DateTime),
            ColumnType::Daten => get(row, idx).map(SqlValue::Date),
            ColumnType::Timen => get(row, idx).map(SqlValue::Time),
            ColumnType::DatetimeOffsetn => get(row, idx).map(SqlValue::DateTimeOffset),
            ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => {
                get::<&[u8]>(row, idx).map(|v| SqlValue::Bytes(v.to_vec()))
            }
            _ => get::<&str>(row, idx).map(|v| SqlValue::String(v.to_string())),
        };

        value.unwrap_or(SqlValue::Null)
    }

    /// SQL type name reported for a result column.
    pub fn sql_type_name(col: &tiberius::Column) -> &'static str {
        match col.column_type() {
            ColumnType::Null => "NULL",
            ColumnType::Bit | ColumnType::Bitn => "BIT",
            ColumnType::Int1 => "TINYINT",
            ColumnType::Int2 => "SMALLINT",
            ColumnType::Int4 | ColumnType::Intn => "INT",
            ColumnType::Int8 => "BIGINT",
            ColumnType::Float4 => "REAL",
            ColumnType::Float8 | ColumnType::Floatn => "FLOAT",
            ColumnType::Money => "MONEY",
            ColumnType::Money4 => "SMALLMONEY",
            ColumnType::Decimaln => "DECIMAL",
            ColumnType::Numericn => "NUMERIC",
            ColumnType::Guid => "UNIQUEIDENTIFIER",
            ColumnType::Datetime | ColumnType::Datetimen => "DATETIME",
            ColumnType::Datetime4 => "SMALLDATETIME",
            ColumnType::Datetime2 => "DATETIME2",
            ColumnType::Daten => "DATE",
            ColumnType::Timen => "TIME",
            ColumnType::DatetimeOffsetn => "DATETIMEOFFSET",
            ColumnType::BigVarBin => "VARBINARY",
            ColumnType::BigBinary => "BINARY",
            ColumnType::Image => "IMAGE",
            ColumnType::BigVarChar => "VARCHAR",
            ColumnType::BigChar => "CHAR",
            ColumnType::NVarchar => "NVARCHAR",
            ColumnType::NChar => "NCHAR",
            ColumnType::Text => "TEXT",
            ColumnType::NText => "NTEXT",
            ColumnType::Xml => "XML",
            _ => "UNKNOWN",
        }
    }
}

/// Hex encoding helper.
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02X}", b)).collect()
    }
}
