//! Entity and table descriptors shared by every model.

use std::{collections::HashMap, fmt};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{error::AppError, tz};

use super::types::ColumnType;

/// Dictionary form of an entity: uuids as strings, datetimes ISO 8601.
pub type Record = Map<String, Value>;

/// Value generated for a column when none is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    NewGuid,
    Now,
}

impl ColumnDefault {
    pub fn generate(self) -> Value {
        match self {
            ColumnDefault::NewGuid => Value::String(Uuid::new_v4().to_string()),
            ColumnDefault::Now => Value::String(tz::isoformat(&tz::utcnow())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub default: Option<ColumnDefault>,
    pub on_update: Option<ColumnDefault>,
    /// `(table, column)` referenced by this column.
    pub references: Option<(String, &'static str)>,
}

impl Column {
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty, nullable: true, unique: false, primary_key: false, default: None, on_update: None, references: None }
    }

    pub fn not_null(mut self) -> Self { self.nullable = false; self }
    pub fn unique(mut self) -> Self { self.unique = true; self }
    pub fn primary_key(mut self) -> Self { self.primary_key = true; self.nullable = false; self }
    pub fn default(mut self, default: ColumnDefault) -> Self { self.default = Some(default); self }
    pub fn on_update(mut self, default: ColumnDefault) -> Self { self.on_update = Some(default); self }
    pub fn references(mut self, table: impl Into<String>, column: &'static str) -> Self {
        self.references = Some((table.into(), column));
        self
    }

    fn ddl(&self) -> String {
        let mut ddl = format!("\"{}\" {}", self.name, self.ty.sql_type());
        if self.primary_key {
            ddl.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            ddl.push_str(" NOT NULL");
        }
        if self.unique {
            ddl.push_str(" UNIQUE");
        }
        if let Some((table, column)) = &self.references {
            ddl.push_str(&format!(" REFERENCES \"{table}\" (\"{column}\")"));
        }
        ddl
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self { Self { name: name.into(), columns } }

    pub fn column(&self, name: &str) -> Option<&Column> { self.columns.iter().find(|c| c.name == name) }

    /// Comma separated, quoted column list, optionally qualified by `alias`.
    pub fn select_list(&self, alias: Option<&str>) -> String {
        self.columns
            .iter()
            .map(|c| match alias {
                Some(alias) => format!("{alias}.\"{}\"", c.name),
                None => format!("\"{}\"", c.name),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_sql(&self) -> String {
        let columns = self.columns.iter().map(Column::ddl).collect::<Vec<_>>().join(", ");
        format!("CREATE TABLE IF NOT EXISTS \"{}\" ({columns})", self.name)
    }

    pub fn drop_sql(&self) -> String { format!("DROP TABLE IF EXISTS \"{}\"", self.name) }
}

/// A persisted model. Records cross the SQL boundary; serde maps them to
/// and from the typed struct.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    const TABLE: &'static str;

    fn columns() -> Vec<Column>;

    fn id(&self) -> Uuid;

    fn table() -> TableDef { TableDef::new(Self::TABLE, Self::columns()) }

    /// Invariants applied before every write (e.g. lower-casing a username).
    fn normalize(&mut self) {}

    /// Full record, every column included.
    fn to_record(&self) -> Result<Record, AppError> { to_record(self) }

    /// Public dictionary form.
    fn as_dict(&self) -> Result<Record, AppError> { self.to_record() }
}

pub fn to_record<T: Serialize>(value: &T) -> Result<Record, AppError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Validation(format!("expected an object, got {other}"))),
    }
}

pub fn from_record<E: Entity>(record: Record) -> Result<E, AppError> {
    serde_json::from_value(Value::Object(record)).map_err(|e| AppError::Validation(format!("invalid {}: {e}", E::TABLE)))
}

/// The well-known roles the built-in relationships resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    User,
    Group,
    Permission,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelRole::User => "User",
            ModelRole::Group => "Group",
            ModelRole::Permission => "Permission",
        };
        f.write_str(name)
    }
}

/// Maps each role to exactly one table.
#[derive(Debug, Clone, Default)]
pub struct ModelMapping {
    tables: HashMap<ModelRole, TableDef>,
}

impl ModelMapping {
    pub fn insert(&mut self, role: ModelRole, table: TableDef) -> Result<(), AppError> {
        if self.tables.contains_key(&role) {
            return Err(AppError::Configuration(format!(
                "Duplicate '{role}' model found. There may only be one non-abstract sub-class."
            )));
        }
        self.tables.insert(role, table);
        Ok(())
    }

    pub fn get(&self, role: ModelRole) -> Option<&TableDef> { self.tables.get(&role) }
}
