//! Column types and their conversion between JSON record values and SQL.
//!
//! GUIDs are stored as 32 character lower-case hex strings, datetimes as
//! fixed-width UTC ISO 8601 text (so lexical order is chronological) and
//! JSON dictionaries as encoded text.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use crate::{error::AppError, tz};

const DATETIME_STORAGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Guid,
    /// VARCHAR(255)
    String,
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
    /// JSON encoded dictionary.
    Json,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Guid => "CHAR(32)",
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Text | ColumnType::DateTime | ColumnType::Json => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Boolean => "BOOLEAN",
        }
    }
}

/// A value bound to a SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

pub fn guid_to_db(id: &Uuid) -> String { id.simple().to_string() }

pub fn guid_from_db(value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value).map_err(|e| AppError::Parse(format!("invalid GUID {value:?}: {e}")))
}

pub fn datetime_to_db(value: &DateTime<Utc>) -> String { value.format(DATETIME_STORAGE_FORMAT).to_string() }

/// Convert a JSON value destined for a column of type `ty`.
pub fn to_sql(column: &str, ty: ColumnType, value: &Value) -> Result<SqlValue, AppError> {
    let mismatch = || AppError::Validation(format!("invalid value for column '{column}': {value}"));
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    let converted = match ty {
        ColumnType::Guid => {
            let text = value.as_str().ok_or_else(mismatch)?;
            let id = Uuid::parse_str(text).map_err(|_| mismatch())?;
            SqlValue::Text(guid_to_db(&id))
        }
        ColumnType::String | ColumnType::Text => SqlValue::Text(value.as_str().ok_or_else(mismatch)?.to_string()),
        ColumnType::Integer => SqlValue::Integer(value.as_i64().ok_or_else(mismatch)?),
        ColumnType::Float => SqlValue::Real(value.as_f64().ok_or_else(mismatch)?),
        ColumnType::Boolean => SqlValue::Integer(i64::from(value.as_bool().ok_or_else(mismatch)?)),
        ColumnType::DateTime => {
            let text = value.as_str().ok_or_else(mismatch)?;
            SqlValue::Text(datetime_to_db(&tz::parse(text)?))
        }
        ColumnType::Json => {
            if !value.is_object() {
                return Err(mismatch());
            }
            SqlValue::Text(serde_json::to_string(value)?)
        }
    };
    Ok(converted)
}

/// Read column `column` of type `ty` from a row as a JSON value.
pub fn from_sql(row: &SqliteRow, column: &str, ty: ColumnType) -> Result<Value, AppError> {
    let value = match ty {
        ColumnType::Guid => match row.try_get::<Option<String>, _>(column)? {
            Some(text) => Value::String(guid_from_db(&text)?.to_string()),
            None => Value::Null,
        },
        ColumnType::String | ColumnType::Text => row.try_get::<Option<String>, _>(column)?.map(Value::String).unwrap_or(Value::Null),
        ColumnType::Integer => row.try_get::<Option<i64>, _>(column)?.map(Value::from).unwrap_or(Value::Null),
        ColumnType::Float => row.try_get::<Option<f64>, _>(column)?.map(Value::from).unwrap_or(Value::Null),
        ColumnType::Boolean => row.try_get::<Option<i64>, _>(column)?.map(|v| Value::Bool(v != 0)).unwrap_or(Value::Null),
        ColumnType::DateTime => match row.try_get::<Option<String>, _>(column)? {
            Some(text) => Value::String(tz::isoformat(&tz::parse(&text)?)),
            None => Value::Null,
        },
        ColumnType::Json => match row.try_get::<Option<String>, _>(column)? {
            Some(text) => serde_json::from_str(&text)?,
            None => Value::Null,
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn guid_is_stored_as_hex() {
        let id = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        let stored = to_sql("id", ColumnType::Guid, &json!(id.to_string())).unwrap();
        assert_eq!(stored, SqlValue::Text("6ba7b8109dad11d180b400c04fd430c8".into()));
        assert_eq!(guid_from_db("6ba7b8109dad11d180b400c04fd430c8").unwrap(), id);
    }

    #[test]
    fn datetimes_are_fixed_width_utc() {
        let stored = to_sql("at", ColumnType::DateTime, &json!("2020-05-01T10:00:00+02:00")).unwrap();
        assert_eq!(stored, SqlValue::Text("2020-05-01T08:00:00.000000Z".into()));
    }

    #[test]
    fn json_columns_only_accept_objects() {
        assert!(to_sql("data", ColumnType::Json, &json!([1, 2])).is_err());
        let stored = to_sql("data", ColumnType::Json, &json!({"a": 1})).unwrap();
        assert_eq!(stored, SqlValue::Text("{\"a\":1}".into()));
    }

    #[test]
    fn type_mismatch_is_a_validation_error() {
        let err = to_sql("age", ColumnType::Integer, &json!("ten")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(to_sql("flag", ColumnType::Boolean, &json!(true)).unwrap(), SqlValue::Integer(1));
        assert_eq!(to_sql("name", ColumnType::String, &Value::Null).unwrap(), SqlValue::Null);
    }
}
