#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use apitoolbox::{
    crud,
    error::AppError,
    mail::{EmailMessage, Mailer},
    models::{users, Metadata, Session, User},
    server,
    settings::Settings,
    utils::{self, EngineOptions},
};
use axum::{
    body::{self, Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

pub const SECRET: &str = "testsecret";

pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
    pub settings: Settings,
    pub metadata: Arc<Metadata>,
    pub dir: TempDir,
}

pub fn settings(dir: &TempDir) -> Settings {
    let path = dir.path().join("apitoolbox.toml");
    std::fs::write(&path, format!("[jwt]\nsecret = \"{SECRET}\"\nsecure_cookie = false\n")).unwrap();
    let mut settings = Settings::load_from(Some(path.to_str().unwrap())).unwrap();
    settings.assets.document_root = dir.path().join("www");
    settings
}

pub async fn pool(dir: &TempDir) -> SqlitePool {
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    utils::create_engine(&url, EngineOptions::default()).await.unwrap()
}

pub async fn test_app(configure: impl FnOnce(&mut Settings), mailer: Option<Arc<dyn Mailer>>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("www")).unwrap();
    let mut settings = settings(&dir);
    configure(&mut settings);
    let pool = pool(&dir).await;
    let metadata = Arc::new(Metadata::standard().unwrap());
    metadata.create_all(&pool).await.unwrap();
    let router = server::app(&settings, pool.clone(), metadata.clone(), mailer).unwrap();
    TestApp { router, pool, settings, metadata, dir }
}

/// Insert a user with `password`, optionally already confirmed.
pub async fn create_user(pool: &SqlitePool, username: &str, password: &str, confirmed: bool) -> User {
    let session = Session::new(pool.clone());
    let mut user = User::new(username, &format!("{username}@example.org"));
    users::set_password(&mut user, password).await.unwrap();
    if confirmed {
        user.confirmed_at = Some(apitoolbox::tz::utcnow());
    }
    crud::insert(&session, &mut user).await.unwrap();
    session.commit().await.unwrap();
    user
}

/// A JWT for `username` carrying `scopes`.
pub fn token(username: &str, scopes: &[&str]) -> String {
    let claims = json!({
        "username": username,
        "scopes": scopes,
        "exp": chrono::Utc::now().timestamp() + 600,
    });
    utils::jwt_encode(claims.as_object().unwrap(), SECRET, jsonwebtoken::Algorithm::HS256).unwrap()
}

pub async fn admin_token(pool: &SqlitePool) -> String {
    create_user(pool, "admin", "adminpass", true).await;
    token("admin", &["*"])
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value { serde_json::from_slice(&self.body).unwrap() }

    pub fn text(&self) -> String { String::from_utf8_lossy(&self.body).into_owned() }

    pub fn header(&self, name: &str) -> &str { self.headers.get(name).unwrap().to_str().unwrap() }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let resp = router.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    TestResponse { status, headers, body }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri).header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("cookie", format!("jwt={token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header("cookie", format!("jwt={token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn form(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={}", encode(v))).collect();
    Request::post(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .header("host", "testserver")
        .body(Body::from(body.join("&")))
        .unwrap()
}

pub fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Keeps every message instead of delivering it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
