//! JSON filter and sort specifications compiled to SQL.
//!
//! A filter is a condition `{"field": "age", "op": ">=", "value": 30}`, a
//! boolean combination `{"and": [...]}` / `{"or": [...]}` / `{"not": [one]}`,
//! or a list of filters which are all required to match.
//!
//! ```
//! use apitoolbox::filters::FilterSpec;
//! let spec: FilterSpec = serde_json::from_str(
//!     r#"[{"field": "name", "op": "ilike", "value": "a%"}, {"or": [{"field": "age", "op": "is_null"}]}]"#,
//! ).unwrap();
//! assert!(matches!(spec, FilterSpec::List(_)));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::AppError,
    models::{
        base::{Column, TableDef},
        types::{self, SqlValue},
    },
};

/// Objects with keys beyond those of one form are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum FilterSpec {
    Condition(Condition),
    And { and: Vec<FilterSpec> },
    Or { or: Vec<FilterSpec> },
    Not { not: Vec<FilterSpec> },
    List(Vec<FilterSpec>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub field: String,
    pub op: String,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: &str, op: &str, value: Value) -> Self {
        Self { field: field.to_string(), op: op.to_string(), value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub nullsfirst: bool,
    #[serde(default)]
    pub nullslast: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    IsNull,
    IsNotNull,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    ILike,
    NotILike,
    In,
    NotIn,
}

impl Operator {
    fn parse(op: &str) -> Result<Self, AppError> {
        let op = match op {
            "is_null" => Operator::IsNull,
            "is_not_null" => Operator::IsNotNull,
            "==" | "eq" => Operator::Eq,
            "!=" | "ne" => Operator::Ne,
            ">" | "gt" => Operator::Gt,
            "<" | "lt" => Operator::Lt,
            ">=" | "ge" => Operator::Ge,
            "<=" | "le" => Operator::Le,
            "like" => Operator::Like,
            "ilike" => Operator::ILike,
            "not_ilike" => Operator::NotILike,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            other => return Err(AppError::Validation(format!("Operator `{other}` not valid."))),
        };
        Ok(op)
    }
}

/// A SQL boolean expression with its positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clause {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Clause {
    pub fn is_empty(&self) -> bool { self.sql.is_empty() }

    /// `" WHERE ..."` or nothing.
    pub fn where_sql(&self) -> String {
        if self.is_empty() { String::new() } else { format!(" WHERE {}", self.sql) }
    }
}

/// Parse a filter from its JSON text form (e.g. a `filter` query parameter).
pub fn parse_filter(text: &str) -> Result<FilterSpec, AppError> {
    serde_json::from_str(text).map_err(|e| AppError::Validation(format!("invalid filter specification: {e}")))
}

/// Parse a sort specification; a single object or a list of objects.
pub fn parse_sort(text: &str) -> Result<Vec<SortSpec>, AppError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<SortSpec>),
        One(SortSpec),
    }
    match serde_json::from_str(text) {
        Ok(OneOrMany::Many(specs)) => Ok(specs),
        Ok(OneOrMany::One(spec)) => Ok(vec![spec]),
        Err(e) => Err(AppError::Validation(format!("invalid sort specification: {e}"))),
    }
}

fn column<'t>(table: &'t TableDef, field: &str) -> Result<&'t Column, AppError> {
    table
        .column(field)
        .ok_or_else(|| AppError::Validation(format!("Field `{field}` not found in table `{}`.", table.name)))
}

/// Compile `spec` against `table`. `None` or an empty list yields an empty clause.
pub fn compile(table: &TableDef, spec: Option<&FilterSpec>) -> Result<Clause, AppError> {
    let mut clause = Clause::default();
    if let Some(spec) = spec {
        if let Some(sql) = compile_spec(table, spec, &mut clause.params)? {
            clause.sql = sql;
        }
    }
    Ok(clause)
}

fn compile_spec(table: &TableDef, spec: &FilterSpec, params: &mut Vec<SqlValue>) -> Result<Option<String>, AppError> {
    let sql = match spec {
        FilterSpec::Condition(condition) => Some(compile_condition(table, condition, params)?),
        FilterSpec::List(specs) | FilterSpec::And { and: specs } => join(table, specs, " AND ", params)?,
        FilterSpec::Or { or } => {
            if or.is_empty() {
                return Err(AppError::Validation("`or` must have one or more arguments".into()));
            }
            join(table, or, " OR ", params)?
        }
        FilterSpec::Not { not } => match not.as_slice() {
            [inner] => compile_spec(table, inner, params)?.map(|sql| format!("NOT ({sql})")),
            _ => return Err(AppError::Validation("`not` must have one argument".into())),
        },
    };
    Ok(sql)
}

fn join(table: &TableDef, specs: &[FilterSpec], separator: &str, params: &mut Vec<SqlValue>) -> Result<Option<String>, AppError> {
    let mut parts = Vec::with_capacity(specs.len());
    for spec in specs {
        if let Some(sql) = compile_spec(table, spec, params)? {
            parts.push(format!("({sql})"));
        }
    }
    Ok(if parts.is_empty() { None } else { Some(parts.join(separator)) })
}

fn compile_condition(table: &TableDef, condition: &Condition, params: &mut Vec<SqlValue>) -> Result<String, AppError> {
    let column = column(table, &condition.field)?;
    let op = Operator::parse(&condition.op)?;
    let name = format!("\"{}\"", column.name);
    let bind = |value: &Value, params: &mut Vec<SqlValue>| -> Result<(), AppError> {
        params.push(types::to_sql(column.name, column.ty, value)?);
        Ok(())
    };

    let sql = match op {
        Operator::IsNull => format!("{name} IS NULL"),
        Operator::IsNotNull => format!("{name} IS NOT NULL"),
        Operator::Eq if condition.value.is_null() => format!("{name} IS NULL"),
        Operator::Ne if condition.value.is_null() => format!("{name} IS NOT NULL"),
        Operator::Eq | Operator::Ne | Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
            let symbol = match op {
                Operator::Eq => "=",
                Operator::Ne => "!=",
                Operator::Gt => ">",
                Operator::Lt => "<",
                Operator::Ge => ">=",
                _ => "<=",
            };
            bind(&condition.value, params)?;
            format!("{name} {symbol} ?")
        }
        Operator::Like => {
            params.push(pattern(condition)?);
            format!("{name} LIKE ?")
        }
        Operator::ILike => {
            params.push(pattern(condition)?);
            format!("lower({name}) LIKE lower(?)")
        }
        Operator::NotILike => {
            params.push(pattern(condition)?);
            format!("lower({name}) NOT LIKE lower(?)")
        }
        Operator::In | Operator::NotIn => {
            let values = condition
                .value
                .as_array()
                .ok_or_else(|| AppError::Validation(format!("`{}` requires a list value", condition.op)))?;
            if values.is_empty() {
                // Nothing is in an empty set.
                return Ok(if op == Operator::In { "0 = 1".into() } else { "1 = 1".into() });
            }
            for value in values {
                bind(value, params)?;
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            let keyword = if op == Operator::In { "IN" } else { "NOT IN" };
            format!("{name} {keyword} ({placeholders})")
        }
    };
    Ok(sql)
}

fn pattern(condition: &Condition) -> Result<SqlValue, AppError> {
    condition
        .value
        .as_str()
        .map(|s| SqlValue::Text(s.to_string()))
        .ok_or_else(|| AppError::Validation(format!("`{}` requires a string pattern", condition.op)))
}

/// `" ORDER BY ..."` for `specs`, or nothing when empty.
pub fn order_by(table: &TableDef, specs: &[SortSpec]) -> Result<String, AppError> {
    if specs.is_empty() {
        return Ok(String::new());
    }
    let mut terms = Vec::with_capacity(specs.len());
    for spec in specs {
        let column = column(table, &spec.field)?;
        let mut term = format!("\"{}\"", column.name);
        term.push_str(match spec.direction {
            SortDirection::Asc => " ASC",
            SortDirection::Desc => " DESC",
        });
        match (spec.nullsfirst, spec.nullslast) {
            (true, true) => return Err(AppError::Validation("`nullsfirst` and `nullslast` are exclusive".into())),
            (true, false) => term.push_str(" NULLS FIRST"),
            (false, true) => term.push_str(" NULLS LAST"),
            (false, false) => {}
        }
        terms.push(term);
    }
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}
