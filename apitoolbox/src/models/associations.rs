//! Many-to-many association tables between users, groups and permissions.

use std::fmt;

use super::{
    base::{Column, ColumnDefault, TableDef},
    mixins,
    types::ColumnType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    GroupMembership,
    UserPermissions,
    GroupPermissions,
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssociationKind::GroupMembership => "group_membership",
            AssociationKind::UserPermissions => "user_permissions",
            AssociationKind::GroupPermissions => "group_permissions",
        };
        f.write_str(name)
    }
}

/// An association table linking `left` rows to `right` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTable {
    pub kind: AssociationKind,
    pub table: TableDef,
    pub left_table: String,
    pub left_column: &'static str,
    pub right_table: String,
    pub right_column: &'static str,
}

impl AssociationTable {
    fn build(
        kind: AssociationKind,
        table_name: &str,
        (left_table, left_column): (&str, &'static str),
        (right_table, right_column): (&str, &'static str),
    ) -> Self {
        let mut columns = vec![
            Column::new("id", ColumnType::Guid).primary_key().default(ColumnDefault::NewGuid),
            Column::new(left_column, ColumnType::Guid).references(left_table, "id"),
            Column::new(right_column, ColumnType::Guid).references(right_table, "id"),
        ];
        columns.extend(mixins::timestamp_columns());
        Self {
            kind,
            table: TableDef::new(table_name, columns),
            left_table: left_table.to_string(),
            left_column,
            right_table: right_table.to_string(),
            right_column,
        }
    }

    pub fn name(&self) -> &str { &self.table.name }
}

/// user <-> group
pub fn create_group_membership_table(table_name: &str, user_table_name: &str, group_table_name: &str) -> AssociationTable {
    AssociationTable::build(
        AssociationKind::GroupMembership,
        table_name,
        (group_table_name, "group_id"),
        (user_table_name, "user_id"),
    )
}

/// user <-> permission
pub fn create_user_permissions_table(table_name: &str, user_table_name: &str, permission_table_name: &str) -> AssociationTable {
    AssociationTable::build(
        AssociationKind::UserPermissions,
        table_name,
        (user_table_name, "user_id"),
        (permission_table_name, "permission_id"),
    )
}

/// group <-> permission
pub fn create_group_permissions_table(table_name: &str, group_table_name: &str, permission_table_name: &str) -> AssociationTable {
    AssociationTable::build(
        AssociationKind::GroupPermissions,
        table_name,
        (group_table_name, "group_id"),
        (permission_table_name, "permission_id"),
    )
}

/// The three association tables with their conventional names.
pub fn default_associations() -> Vec<AssociationTable> {
    vec![
        create_group_membership_table("group_membership", "users", "groups"),
        create_user_permissions_table("user_permissions", "users", "permissions"),
        create_group_permissions_table("group_permissions", "groups", "permissions"),
    ]
}
