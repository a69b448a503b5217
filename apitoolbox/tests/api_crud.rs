mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{admin_token, encode, get, json_request, send, test_app, token};

#[tokio::test]
async fn management_routes_need_an_admin() {
    let app = test_app(|_| {}, None).await;

    let resp = send(&app.router, get("/api/permissions", None)).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    common::create_user(&app.pool, "reader", "readerpass", true).await;
    let reader = token("reader", &["read"]);
    let resp = send(&app.router, get("/api/permissions", Some(&reader))).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    // A token for a user that does not exist authenticates nobody.
    let ghost = token("ghost", &["*"]);
    let resp = send(&app.router, get("/api/permissions", Some(&ghost))).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let admin = admin_token(&app.pool).await;
    let resp = send(&app.router, get("/api/permissions", Some(&admin))).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!([]));
}

#[tokio::test]
async fn permissions_crud_cycle() {
    let app = test_app(|_| {}, None).await;
    let admin = admin_token(&app.pool).await;

    let resp = send(&app.router, json_request("POST", "/api/permissions", Some(&admin), json!({ "name": "read" }))).await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let created = resp.json();
    assert_eq!(created["name"], "read");
    let id = created["id"].as_str().unwrap().to_string();
    assert!(created["created_at"].as_str().unwrap().ends_with('Z'));

    let resp = send(&app.router, json_request("POST", "/api/permissions", Some(&admin), json!({ "name": "read" }))).await;
    assert_eq!(resp.status, StatusCode::CONFLICT);

    let resp = send(&app.router, get(&format!("/api/permissions/{id}"), Some(&admin))).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["name"], "read");

    let resp = send(&app.router, json_request("PATCH", &format!("/api/permissions/{id}"), Some(&admin), json!({ "name": "view" }))).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["name"], "view");

    let resp = send(&app.router, json_request("PUT", &format!("/api/permissions/{id}"), Some(&admin), json!({ "bogus": 1 }))).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.json()["error"].as_str().unwrap().contains("unknown field 'bogus'"));

    let resp = send(&app.router, json_request("DELETE", &format!("/api/permissions/{id}"), Some(&admin), json!(null))).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = send(&app.router, get(&format!("/api/permissions/{id}"), Some(&admin))).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_filters_sorts_and_pages() {
    let app = test_app(|_| {}, None).await;
    let admin = admin_token(&app.pool).await;
    for name in ["alpha", "beta", "gamma", "delta"] {
        let resp = send(&app.router, json_request("POST", "/api/groups", Some(&admin), json!({ "name": name }))).await;
        assert_eq!(resp.status, StatusCode::CREATED);
    }

    let sort = encode(r#"{"field": "name", "direction": "desc"}"#);
    let resp = send(&app.router, get(&format!("/api/groups?sort={sort}&limit=2&offset=1"), Some(&admin))).await;
    assert_eq!(resp.status, StatusCode::OK);
    let names: Vec<String> = resp.json().as_array().unwrap().iter().map(|g| g["name"].as_str().unwrap().to_string()).collect();
    assert_eq!(names, ["delta", "beta"]);

    let filter = encode(r#"{"or": [{"field": "name", "op": "eq", "value": "alpha"}, {"field": "name", "op": "like", "value": "%mm%"}]}"#);
    let sort = encode(r#"{"field": "name"}"#);
    let resp = send(&app.router, get(&format!("/api/groups?filter={filter}&sort={sort}"), Some(&admin))).await;
    let names: Vec<String> = resp.json().as_array().unwrap().iter().map(|g| g["name"].as_str().unwrap().to_string()).collect();
    assert_eq!(names, ["alpha", "gamma"]);

    let filter = encode(r#"{"field": "colour", "op": "eq", "value": "red"}"#);
    let resp = send(&app.router, get(&format!("/api/groups?filter={filter}"), Some(&admin))).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.json()["error"].as_str().unwrap().contains("Field `colour` not found in table `groups`."));

    let filter = encode(r#"{"field": "name", "op": "between", "value": 1}"#);
    let resp = send(&app.router, get(&format!("/api/groups?filter={filter}"), Some(&admin))).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.json()["error"].as_str().unwrap().contains("Operator `between` not valid."));

    let resp = send(&app.router, get("/api/groups?limit=0", Some(&admin))).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn users_listing_hides_password_hashes() {
    let app = test_app(|_| {}, None).await;
    let admin = admin_token(&app.pool).await;
    let resp = send(&app.router, get("/api/users", Some(&admin))).await;
    assert_eq!(resp.status, StatusCode::OK);
    let users = resp.json();
    assert_eq!(users.as_array().unwrap().len(), 1);
    assert_eq!(users[0]["username"], "admin");
    assert!(users[0].get("hashed_password").is_none());
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app(|_| {}, None).await;
    let resp = send(&app.router, get("/healthz", None)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({ "status": "ok" }));
}

#[tokio::test]
async fn users_require_an_email() {
    let app = test_app(|_| {}, None).await;
    let admin = admin_token(&app.pool).await;

    let resp = send(&app.router, json_request("POST", "/api/users", Some(&admin), json!({ "username": "dave" }))).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.json()["error"].as_str().unwrap().contains("email"));

    let body = json!({ "username": "dave", "email": "dave@example.org" });
    let resp = send(&app.router, json_request("POST", "/api/users", Some(&admin), body)).await;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.json()["email"], "dave@example.org");

    let null_email = sqlx::query("INSERT INTO users (id, username, email, created_at, updated_at) VALUES ('00', 'erin', NULL, '', '')")
        .execute(&app.pool)
        .await;
    assert!(null_email.is_err());
}
