//! Reusable column groups.
//!
//! Timestamp columns go at the end of a table and confirmation columns
//! right before them, so entity column lists read
//! `[id, own columns..., confirmation..., updated_at, created_at]`.

use super::base::{Column, ColumnDefault};
use super::types::ColumnType;

/// UUID primary key generated on insert.
pub fn guid_column() -> Column {
    Column::new("id", ColumnType::Guid).primary_key().default(ColumnDefault::NewGuid)
}

/// `updated_at` (refreshed on every update) and `created_at`.
pub fn timestamp_columns() -> Vec<Column> {
    vec![
        Column::new("updated_at", ColumnType::DateTime)
            .not_null()
            .default(ColumnDefault::Now)
            .on_update(ColumnDefault::Now),
        Column::new("created_at", ColumnType::DateTime).not_null().default(ColumnDefault::Now),
    ]
}

/// Unique email plus the confirmation timestamp.
pub fn confirmation_columns() -> Vec<Column> {
    vec![
        Column::new("email", ColumnType::String).not_null().unique(),
        Column::new("confirmed_at", ColumnType::DateTime),
    ]
}

/// Assemble `[id, columns..., timestamps]`.
pub fn with_guid_and_timestamps(columns: Vec<Column>) -> Vec<Column> {
    let mut all = vec![guid_column()];
    all.extend(columns);
    all.extend(timestamp_columns());
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_appended_last() {
        let columns = with_guid_and_timestamps(vec![Column::new("name", ColumnType::String)]);
        let names: Vec<_> = columns.iter().map(|c| c.name).collect();
        assert_eq!(names, ["id", "name", "updated_at", "created_at"]);
        assert_eq!(columns[2].on_update, Some(ColumnDefault::Now));
        assert_eq!(columns[3].on_update, None);
    }
}
