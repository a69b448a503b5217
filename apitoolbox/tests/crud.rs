mod common;

use apitoolbox::{
    crud,
    error::AppError,
    filters::{parse_filter, parse_sort},
    models::{mixins, Column, ColumnType, Entity, Metadata, Record, Session},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Person {
    id: Uuid,
    name: String,
    order: Option<i64>,
    gender: Option<String>,
    age: Option<i64>,
    updated_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl Entity for Person {
    const TABLE: &'static str = "people";

    fn columns() -> Vec<Column> {
        mixins::with_guid_and_timestamps(vec![
            Column::new("name", ColumnType::String).not_null().unique(),
            Column::new("order", ColumnType::Integer),
            Column::new("gender", ColumnType::String),
            Column::new("age", ColumnType::Integer),
        ])
    }

    fn id(&self) -> Uuid { self.id }
}

fn record(value: Value) -> Record { value.as_object().unwrap().clone() }

async fn seeded() -> (tempfile::TempDir, Session) {
    let dir = tempfile::tempdir().unwrap();
    let pool = common::pool(&dir).await;
    let mut metadata = Metadata::new();
    metadata.register::<Person>();
    metadata.create_all(&pool).await.unwrap();
    let session = Session::new(pool);
    let people = [
        json!({ "name": "Alice", "order": 1, "gender": "F", "age": 31 }),
        json!({ "name": "Bob", "order": 2, "gender": "M", "age": 45 }),
        json!({ "name": "Carol", "order": 3, "gender": "F", "age": 27 }),
        json!({ "name": "Dave", "order": 4, "gender": null, "age": null }),
    ];
    for person in people {
        crud::create_instance::<Person>(&session, record(person), false).await.unwrap();
    }
    session.commit().await.unwrap();
    (dir, session)
}

async fn names(session: &Session, filter: &str, sort: &str) -> Vec<String> {
    let filter = parse_filter(filter).unwrap();
    let sort = parse_sort(sort).unwrap();
    crud::list_instances::<Person>(session, Some(&filter), &sort, 0, None)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn filters_compose() {
    let (_dir, session) = seeded().await;
    let by_order = r#"{"field": "order"}"#;

    assert_eq!(names(&session, r#"{"field": "gender", "op": "eq", "value": "F"}"#, by_order).await, ["Alice", "Carol"]);
    assert_eq!(names(&session, r#"{"field": "age", "op": ">=", "value": 31}"#, by_order).await, ["Alice", "Bob"]);
    assert_eq!(names(&session, r#"{"field": "gender", "op": "is_null"}"#, by_order).await, ["Dave"]);
    assert_eq!(names(&session, r#"{"field": "gender", "op": "eq", "value": null}"#, by_order).await, ["Dave"]);
    assert_eq!(names(&session, r#"{"field": "name", "op": "ilike", "value": "%AR%"}"#, by_order).await, ["Carol"]);
    assert_eq!(names(&session, r#"{"field": "name", "op": "in", "value": ["Bob", "Dave"]}"#, by_order).await, ["Bob", "Dave"]);
    assert!(names(&session, r#"{"field": "name", "op": "in", "value": []}"#, by_order).await.is_empty());
    assert_eq!(
        names(&session, r#"{"not": {"field": "gender", "op": "eq", "value": "F"}}"#, by_order).await,
        ["Bob"],
        "NOT follows SQL null semantics"
    );
    assert_eq!(
        names(
            &session,
            r#"[{"field": "gender", "op": "eq", "value": "F"}, {"field": "age", "op": "lt", "value": 30}]"#,
            by_order
        )
        .await,
        ["Carol"]
    );
    assert_eq!(
        names(&session, r#"[]"#, r#"[{"field": "age", "direction": "desc", "nullslast": true}]"#).await,
        ["Bob", "Alice", "Carol", "Dave"]
    );
    session.close().await;
}

#[tokio::test]
async fn create_update_delete() {
    let (_dir, session) = seeded().await;
    assert_eq!(crud::count_instances::<Person>(&session, None).await.unwrap(), 4);

    let err = crud::create_instance::<Person>(&session, record(json!({ "name": "Alice" })), true).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    session.rollback().await.unwrap();

    let erin = crud::create_instance::<Person>(&session, record(json!({ "name": "Erin", "age": 22 })), true).await.unwrap();
    let id = Uuid::parse_str(erin["id"].as_str().unwrap()).unwrap();

    let updated = crud::update_instance::<Person>(&session, id, record(json!({ "age": 23 })), true).await.unwrap();
    assert_eq!(updated["age"], 23);
    assert_eq!(updated["name"], "Erin");
    assert_ne!(updated["updated_at"], erin["updated_at"]);
    assert_eq!(updated["created_at"], erin["created_at"]);

    let err = crud::update_instance::<Person>(&session, id, record(json!({ "id": Uuid::new_v4() })), false).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let page = crud::list_instances::<Person>(&session, None, &parse_sort(r#"{"field": "name"}"#).unwrap(), 1, Some(2)).await.unwrap();
    let page: Vec<&str> = page.iter().map(|p| p["name"].as_str().unwrap()).collect();
    assert_eq!(page, ["Bob", "Carol"]);

    crud::delete_instance::<Person>(&session, id, true).await.unwrap();
    assert!(matches!(crud::retrieve_instance::<Person>(&session, id).await, Err(AppError::NotFound(_))));
    assert!(matches!(crud::delete_instance::<Person>(&session, id, true).await, Err(AppError::NotFound(_))));
    session.close().await;
}
