//! Reading and replacing rows related through an association table.

use uuid::Uuid;

use crate::{crud, error::AppError, tz};

use super::{
    associations::{AssociationKind, AssociationTable},
    base::{Entity, TableDef},
    schema::Metadata,
    session::{Session, Statement},
    types::{self, SqlValue},
};

/// `(owner column, target column)` of `association` for target table `target`.
fn sides<'a>(association: &'a AssociationTable, target: &str) -> Result<(&'a str, &'a str), AppError> {
    if association.right_table == target {
        Ok((association.left_column, association.right_column))
    } else if association.left_table == target {
        Ok((association.right_column, association.left_column))
    } else {
        Err(AppError::Configuration(format!(
            "'{}' association does not reference table '{target}'",
            association.kind
        )))
    }
}

fn guid(id: &Uuid) -> SqlValue { SqlValue::Text(types::guid_to_db(id)) }

/// Every `T` linked to `owner_id`, ordered by id.
pub async fn related<T: Entity>(session: &Session, association: &AssociationTable, owner_id: Uuid) -> Result<Vec<T>, AppError> {
    let table = T::table();
    let (owner_column, target_column) = sides(association, &table.name)?;
    let statement = Statement::new(format!(
        "SELECT {cols} FROM \"{target}\" t JOIN \"{assoc}\" a ON a.\"{target_column}\" = t.\"id\" \
         WHERE a.\"{owner_column}\" = ? ORDER BY t.\"id\"",
        cols = table.select_list(Some("t")),
        target = table.name,
        assoc = association.name(),
    ))
    .bind(guid(&owner_id));
    load(session, &table, &statement).await
}

/// Replace the set of `T` linked to `owner_id` with `target_ids`.
pub async fn set_related<T: Entity>(
    session: &Session,
    association: &AssociationTable,
    owner_id: Uuid,
    target_ids: &[Uuid],
) -> Result<(), AppError> {
    let (owner_column, target_column) = sides(association, T::TABLE)?;
    let delete = Statement::new(format!("DELETE FROM \"{}\" WHERE \"{owner_column}\" = ?", association.name())).bind(guid(&owner_id));
    session.execute(&delete).await?;

    let now = SqlValue::Text(types::datetime_to_db(&tz::utcnow()));
    for target_id in target_ids {
        let insert = Statement::new(format!(
            "INSERT INTO \"{}\" (\"id\", \"{owner_column}\", \"{target_column}\", \"updated_at\", \"created_at\") VALUES (?, ?, ?, ?, ?)",
            association.name()
        ))
        .bind(guid(&Uuid::new_v4()))
        .bind(guid(&owner_id))
        .bind(guid(target_id))
        .bind(now.clone())
        .bind(now.clone());
        session.execute(&insert).await?;
    }
    tracing::debug!(association = %association.kind, owner = %owner_id, count = target_ids.len(), "association replaced");
    Ok(())
}

/// Permissions granted to a user directly or through any of their groups.
///
/// Requires all three association tables.
pub async fn effective_permissions<P: Entity>(session: &Session, metadata: &Metadata, user_id: Uuid) -> Result<Vec<P>, AppError> {
    let user_permissions = metadata.require_association(AssociationKind::UserPermissions)?;
    let group_permissions = metadata.require_association(AssociationKind::GroupPermissions)?;
    let membership = metadata.require_association(AssociationKind::GroupMembership)?;

    let table = P::table();
    let cols = table.select_list(Some("p"));
    let statement = Statement::new(format!(
        "SELECT {cols} FROM \"{perm}\" p JOIN \"{up}\" up ON up.\"permission_id\" = p.\"id\" WHERE up.\"user_id\" = ? \
         UNION \
         SELECT {cols} FROM \"{perm}\" p JOIN \"{gp}\" gp ON gp.\"permission_id\" = p.\"id\" \
         JOIN \"{gm}\" gm ON gm.\"group_id\" = gp.\"group_id\" WHERE gm.\"user_id\" = ? \
         ORDER BY \"id\"",
        perm = table.name,
        up = user_permissions.name(),
        gp = group_permissions.name(),
        gm = membership.name(),
    ))
    .bind(guid(&user_id))
    .bind(guid(&user_id));
    load(session, &table, &statement).await
}

async fn load<T: Entity>(session: &Session, table: &TableDef, statement: &Statement) -> Result<Vec<T>, AppError> {
    let rows = session.fetch_all(statement).await?;
    rows.iter().map(|row| crud::entity_from_row(table, row)).collect()
}

/// Ids in `requested` that are absent from `found`, sorted.
pub fn missing_ids(requested: &[Uuid], found: &[Uuid]) -> Vec<Uuid> {
    let mut missing: Vec<Uuid> = requested.iter().filter(|id| !found.contains(id)).copied().collect();
    missing.sort();
    missing.dedup();
    missing
}
