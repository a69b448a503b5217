//! Generic CRUD operations over any [`Entity`].
//!
//! The `*_instance` functions speak records (the `as_dict` form) and map
//! missing rows to 404; the typed helpers below them return entities.
//! Every function runs on the caller's session.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::{
    error::AppError,
    filters::{self, FilterSpec, SortSpec},
    models::{
        base::{from_record, Entity, Record, TableDef},
        session::{Session, Statement},
        types::{self, SqlValue},
    },
};

/// Build a record from a row selected with `table.select_list`.
pub fn record_from_row(table: &TableDef, row: &SqliteRow) -> Result<Record, AppError> {
    let mut record = Record::new();
    for column in &table.columns {
        record.insert(column.name.to_string(), types::from_sql(row, column.name, column.ty)?);
    }
    Ok(record)
}

pub fn entity_from_row<E: Entity>(table: &TableDef, row: &SqliteRow) -> Result<E, AppError> {
    from_record(record_from_row(table, row)?)
}

fn id_param(id: &Uuid) -> SqlValue { SqlValue::Text(types::guid_to_db(id)) }

fn reject_unknown_keys(table: &TableDef, data: &Record) -> Result<(), AppError> {
    match data.keys().find(|key| table.column(key).is_none()) {
        Some(key) => Err(AppError::Validation(format!("unknown field '{key}' for {}", table.name))),
        None => Ok(()),
    }
}

/// Rows of `E` matching `filter`, ordered by `sort`.
pub async fn list_instances<E: Entity>(
    session: &Session,
    filter: Option<&FilterSpec>,
    sort: &[SortSpec],
    offset: u64,
    limit: Option<u64>,
) -> Result<Vec<Record>, AppError> {
    let table = E::table();
    let clause = filters::compile(&table, filter)?;
    let mut sql = format!("SELECT {} FROM \"{}\"{}", table.select_list(None), table.name, clause.where_sql());
    sql.push_str(&filters::order_by(&table, sort)?);
    // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    sql.push_str(" LIMIT ? OFFSET ?");
    let statement = Statement::new(sql)
        .bind_all(clause.params)
        .bind(SqlValue::Integer(limit))
        .bind(SqlValue::Integer(offset as i64));

    let rows = session.fetch_all(&statement).await?;
    rows.iter().map(|row| entity_from_row::<E>(&table, row)?.as_dict()).collect()
}

/// Number of rows of `E` matching `filter`.
pub async fn count_instances<E: Entity>(session: &Session, filter: Option<&FilterSpec>) -> Result<i64, AppError> {
    use sqlx::Row;

    let table = E::table();
    let clause = filters::compile(&table, filter)?;
    let statement = Statement::new(format!("SELECT COUNT(*) AS n FROM \"{}\"{}", table.name, clause.where_sql()))
        .bind_all(clause.params);
    let row = session
        .fetch_optional(&statement)
        .await?
        .ok_or_else(|| AppError::Database("count returned no rows".into()))?;
    Ok(row.try_get::<i64, _>("n")?)
}

/// Create a row from `data`. Missing columns take their defaults; unknown
/// keys are rejected. Uniqueness violations surface as 409.
pub async fn create_instance<E: Entity>(session: &Session, mut data: Record, commit: bool) -> Result<Record, AppError> {
    let table = E::table();
    reject_unknown_keys(&table, &data)?;
    for column in &table.columns {
        if let Some(default) = column.default {
            if data.get(column.name).map_or(true, Value::is_null) {
                data.insert(column.name.to_string(), default.generate());
            }
        }
    }
    let mut instance: E = from_record(data)?;
    insert(session, &mut instance).await?;
    if commit {
        session.commit().await?;
    }
    retrieve_instance::<E>(session, instance.id()).await
}

pub async fn retrieve_instance<E: Entity>(session: &Session, id: Uuid) -> Result<Record, AppError> {
    fetch::<E>(session, id).await?.ok_or_else(AppError::not_found)?.as_dict()
}

/// Partial update: only the keys present in `data` change (plus any
/// `on_update` columns).
pub async fn update_instance<E: Entity>(session: &Session, id: Uuid, data: Record, commit: bool) -> Result<Record, AppError> {
    let table = E::table();
    reject_unknown_keys(&table, &data)?;
    if let Some(new_id) = data.get("id") {
        if new_id.as_str().and_then(|s| Uuid::parse_str(s).ok()) != Some(id) {
            return Err(AppError::Validation("the primary key cannot be changed".into()));
        }
    }
    let existing = fetch::<E>(session, id).await?.ok_or_else(AppError::not_found)?;
    let mut record = existing.to_record()?;
    record.extend(data);
    let mut instance: E = from_record(record)?;
    save(session, &mut instance).await?;
    if commit {
        session.commit().await?;
    }
    retrieve_instance::<E>(session, id).await
}

/// Delete a row, returning its last dictionary form.
pub async fn delete_instance<E: Entity>(session: &Session, id: Uuid, commit: bool) -> Result<Record, AppError> {
    let instance = fetch::<E>(session, id).await?.ok_or_else(AppError::not_found)?;
    let result = instance.as_dict()?;
    let statement = Statement::new(format!("DELETE FROM \"{}\" WHERE \"id\" = ?", E::TABLE)).bind(id_param(&id));
    session.execute(&statement).await?;
    if commit {
        session.commit().await?;
    }
    Ok(result)
}

/// Load `E` by primary key.
pub async fn fetch<E: Entity>(session: &Session, id: Uuid) -> Result<Option<E>, AppError> {
    let table = E::table();
    let statement = Statement::new(format!("SELECT {} FROM \"{}\" WHERE \"id\" = ?", table.select_list(None), table.name))
        .bind(id_param(&id));
    match session.fetch_optional(&statement).await? {
        Some(row) => Ok(Some(entity_from_row(&table, &row)?)),
        None => Ok(None),
    }
}

/// First row whose `column` equals `value`.
pub async fn find_by<E: Entity>(session: &Session, column: &str, value: Value) -> Result<Option<E>, AppError> {
    let table = E::table();
    let col = table
        .column(column)
        .ok_or_else(|| AppError::Validation(format!("unknown field '{column}' for {}", table.name)))?;
    let param = types::to_sql(col.name, col.ty, &value)?;
    let statement = Statement::new(format!(
        "SELECT {} FROM \"{}\" WHERE \"{}\" = ? LIMIT 1",
        table.select_list(None),
        table.name,
        col.name
    ))
    .bind(param);
    match session.fetch_optional(&statement).await? {
        Some(row) => Ok(Some(entity_from_row(&table, &row)?)),
        None => Ok(None),
    }
}

/// Insert `instance` as a new row.
pub async fn insert<E: Entity>(session: &Session, instance: &mut E) -> Result<(), AppError> {
    instance.normalize();
    let table = E::table();
    let record = instance.to_record()?;
    let mut names = Vec::with_capacity(table.columns.len());
    let mut params = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        names.push(format!("\"{}\"", column.name));
        params.push(types::to_sql(column.name, column.ty, record.get(column.name).unwrap_or(&Value::Null))?);
    }
    let placeholders = vec!["?"; names.len()].join(", ");
    let statement =
        Statement::new(format!("INSERT INTO \"{}\" ({}) VALUES ({placeholders})", table.name, names.join(", "))).bind_all(params);
    session.execute(&statement).await?;
    tracing::debug!(table = %table.name, id = %instance.id(), "inserted");
    Ok(())
}

/// Write every column of an existing row, refreshing `on_update` columns.
pub async fn save<E: Entity>(session: &Session, instance: &mut E) -> Result<(), AppError> {
    instance.normalize();
    let table = E::table();
    let mut record = instance.to_record()?;
    for column in &table.columns {
        if let Some(generator) = column.on_update {
            record.insert(column.name.to_string(), generator.generate());
        }
    }
    *instance = from_record(record.clone())?;

    let mut assignments = Vec::new();
    let mut params = Vec::new();
    for column in table.columns.iter().filter(|c| !c.primary_key) {
        assignments.push(format!("\"{}\" = ?", column.name));
        params.push(types::to_sql(column.name, column.ty, record.get(column.name).unwrap_or(&Value::Null))?);
    }
    let statement = Statement::new(format!("UPDATE \"{}\" SET {} WHERE \"id\" = ?", table.name, assignments.join(", ")))
        .bind_all(params)
        .bind(id_param(&instance.id()));
    if session.execute(&statement).await? == 0 {
        return Err(AppError::not_found());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::groups::Group;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn session() -> Session {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::query(&Group::table().create_sql()).execute(&pool).await.unwrap();
        Session::new(pool)
    }

    #[tokio::test]
    async fn insert_then_find_by_name() {
        let session = session().await;
        let mut group = Group::new("admins");
        insert(&session, &mut group).await.unwrap();
        let found = find_by::<Group>(&session, "name", Value::String("admins".into())).await.unwrap().unwrap();
        assert_eq!(found, group);
        assert!(find_by::<Group>(&session, "nope", Value::Null).await.is_err());
        session.close().await;
    }

    #[tokio::test]
    async fn save_refreshes_updated_at() {
        let session = session().await;
        let mut group = Group::new("staff");
        insert(&session, &mut group).await.unwrap();
        let created = group.updated_at;
        group.name = "people".into();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        save(&session, &mut group).await.unwrap();
        let loaded = fetch::<Group>(&session, group.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "people");
        assert!(loaded.updated_at > created);
        assert_eq!(loaded.created_at, group.created_at);
        session.close().await;
    }
}
