mod common;

use std::sync::Arc;

use apitoolbox::{
    auth::{self, Authenticated, PayloadAuthBackend, ScopeValidator},
    middleware::{self, JwtConfig, SessionPool, UpstreamPayloadConfig},
    models::{DbSession, Metadata},
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use serde_json::json;

use common::send;

async fn whoami(Authenticated(context): Authenticated) -> Json<serde_json::Value> {
    Json(json!({
        "username": context.user.map(|u| u.username),
        "scopes": context.scopes,
        "service": context.service_name,
    }))
}

async fn session_state(DbSession(session): DbSession) -> String { session.in_transaction().await.to_string() }

fn upstream_app(service_user_enabled: bool) -> Router {
    let config = UpstreamPayloadConfig { service_user_enabled, ..UpstreamPayloadConfig::default() };
    Router::new()
        .route("/whoami", get(whoami))
        .route(
            "/write",
            get(|| async { "written" }).route_layer(from_fn_with_state(Arc::new(ScopeValidator::all(["write"])), auth::require_scopes)),
        )
        .layer(from_fn_with_state(Arc::new(PayloadAuthBackend::new()), auth::authenticate))
        .layer(from_fn_with_state(Arc::new(config), middleware::upstream_payload))
}

fn request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::get(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn upstream_headers_authenticate() {
    let app = upstream_app(false);

    let resp = send(&app, request("/whoami", &[])).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let headers = [("x-payload-username", "alice"), ("x-payload-scopes", "read, write")];
    let resp = send(&app, request("/whoami", &headers)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({ "username": "alice", "scopes": ["read", "write"], "service": null }));

    let resp = send(&app, request("/write", &headers)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = send(&app, request("/write", &[("x-payload-username", "bob"), ("x-payload-scopes", "read")])).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    let resp = send(&app, request("/write", &[("x-payload-username", "root"), ("x-payload-scopes", "*")])).await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn internal_services_need_opt_in() {
    let service = [("x-zuar-internal-service", "scheduler")];

    let resp = send(&upstream_app(false), request("/whoami", &service)).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = send(&upstream_app(true), request("/whoami", &service)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({ "username": "zuar_service_scheduler", "scopes": ["*"], "service": "scheduler" }));
}

#[tokio::test]
async fn jwt_from_cookie_query_or_header() {
    let app = Router::new()
        .route("/whoami", get(whoami))
        .layer(from_fn_with_state(Arc::new(PayloadAuthBackend::new()), auth::authenticate))
        .layer(from_fn_with_state(Arc::new(JwtConfig::new(common::SECRET)), middleware::jwt_payload));
    let token = common::token("alice", &["read"]);

    for req in [
        request("/whoami", &[("cookie", &format!("jwt={token}"))]),
        request(&format!("/whoami?jwt={token}"), &[]),
        request("/whoami", &[("x-jwt", &token)]),
    ] {
        let resp = send(&app, req).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.json()["username"], "alice");
    }

    let resp = send(&app, request("/whoami", &[("cookie", "jwt=not-a-token")])).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_is_added_per_request() {
    let dir = tempfile::tempdir().unwrap();
    let pool = common::pool(&dir).await;
    Metadata::standard().unwrap().create_all(&pool).await.unwrap();

    let bare = Router::new().route("/session", get(session_state));
    let resp = send(&bare, request("/session", &[])).await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(resp.json()["error"].as_str().unwrap().contains("Missing request session"));

    let app = bare.layer(from_fn_with_state(SessionPool::from(pool), middleware::session));
    let resp = send(&app, request("/session", &[])).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "false");
}
