use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{crud, error::AppError, tz};

use super::{
    base::{Column, Entity},
    mixins,
    session::Session,
    types::ColumnType,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        let now = tz::utcnow();
        Self { id: Uuid::new_v4(), name: name.to_string(), updated_at: now, created_at: now }
    }

    pub async fn get_by_name(session: &Session, name: &str) -> Result<Option<Self>, AppError> {
        crud::find_by::<Self>(session, "name", serde_json::Value::String(name.to_string())).await
    }
}

impl Entity for Group {
    const TABLE: &'static str = "groups";

    fn columns() -> Vec<Column> {
        mixins::with_guid_and_timestamps(vec![Column::new("name", ColumnType::String).not_null()])
    }

    fn id(&self) -> Uuid { self.id }
}
