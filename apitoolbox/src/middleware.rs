//! Request middleware: per-request database session and the two ways a
//! request payload is obtained (trusted upstream headers or a JWT).
//!
//! Install with `axum::middleware::from_fn_with_state`:
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/", get(handler))
//!     .layer(from_fn_with_state(auth_backend, auth::authenticate))
//!     .layer(from_fn_with_state(Arc::new(JwtConfig::new("secret")), middleware::jwt_payload))
//!     .layer(from_fn_with_state(SessionPool::from(pool), middleware::session));
//! ```

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::{
    db_registry::DbRegistry,
    error::AppError,
    models::{base::Record, session::Session},
    utils::{self, EngineOptions},
};

pub const PAYLOAD_HEADER_PREFIX: &str = "x-payload-";
pub const HEADER_ZUAR_SERVICE_NAME: &str = "x-zuar-internal-service";

/// Claims describing the caller, plus the internal service name when the
/// caller is a trusted service rather than a user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPayload {
    pub claims: Record,
    pub service_name: Option<String>,
}

/// Where the session middleware gets its pool from.
#[derive(Clone)]
pub enum SessionPool {
    /// One pool for the lifetime of the router.
    Fixed(SqlitePool),
    /// Looked up in `registry` on every request, so a pool closed by the
    /// registry's cleanup is replaced instead of reused.
    Registry { registry: &'static DbRegistry, url: String, options: EngineOptions },
}

impl SessionPool {
    pub fn registry(registry: &'static DbRegistry, url: impl Into<String>, options: EngineOptions) -> Self {
        SessionPool::Registry { registry, url: url.into(), options }
    }

    pub async fn pool(&self) -> Result<SqlitePool, AppError> {
        match self {
            SessionPool::Fixed(pool) => Ok(pool.clone()),
            SessionPool::Registry { registry, url, options } => registry.get_or_create(url, *options).await,
        }
    }
}

impl From<SqlitePool> for SessionPool {
    fn from(pool: SqlitePool) -> Self { SessionPool::Fixed(pool) }
}

/// Add a [`Session`] to the request unless one is already present.
/// A session added here is closed afterwards, discarding uncommitted work.
pub async fn session(State(source): State<SessionPool>, mut req: Request, next: Next) -> Response {
    let added = if req.extensions().get::<Arc<Session>>().is_none() {
        let pool = match source.pool().await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!(error = %e, "no database pool for request");
                return e.into_response();
            }
        };
        let session = Arc::new(Session::new(pool));
        req.extensions_mut().insert(session.clone());
        Some(session)
    } else {
        None
    };
    let response = next.run(req).await;
    if let Some(session) = added {
        session.close().await;
    }
    response
}

#[derive(Debug, Clone)]
pub struct UpstreamPayloadConfig {
    pub header_prefix: String,
    pub header_service_name: String,
    pub service_user_enabled: bool,
}

impl Default for UpstreamPayloadConfig {
    fn default() -> Self {
        Self {
            header_prefix: PAYLOAD_HEADER_PREFIX.to_string(),
            header_service_name: HEADER_ZUAR_SERVICE_NAME.to_string(),
            service_user_enabled: false,
        }
    }
}

fn service_name(headers: &HeaderMap, header: &str, enabled: bool, claims: &Record) -> Option<String> {
    if !enabled || !claims.is_empty() {
        return None;
    }
    headers.get(header).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Build the payload from `x-payload-*` headers.
///
/// Only safe behind an upstream gateway that owns these headers; otherwise
/// a client could grant itself any scope.
pub async fn upstream_payload(State(config): State<Arc<UpstreamPayloadConfig>>, mut req: Request, next: Next) -> Response {
    let payload = payload_from_headers(req.headers(), &config);
    req.extensions_mut().insert(payload);
    next.run(req).await
}

pub fn payload_from_headers(headers: &HeaderMap, config: &UpstreamPayloadConfig) -> RequestPayload {
    let mut claims = Record::new();
    for name in headers.keys() {
        let Some(key) = name.as_str().strip_prefix(config.header_prefix.as_str()) else { continue };
        let mut values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| Value::String(v.to_string()))
            .collect();
        let value = if values.len() == 1 { values.remove(0) } else { Value::Array(values) };
        claims.insert(key.to_string(), value);
    }
    let service_name = service_name(headers, &config.header_service_name, config.service_user_enabled, &claims);
    RequestPayload { claims, service_name }
}

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub cookie_name: String,
    pub algorithms: Vec<Algorithm>,
    pub header_service_name: String,
    pub service_user_enabled: bool,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            cookie_name: "jwt".to_string(),
            algorithms: vec![Algorithm::HS256, Algorithm::HS512],
            header_service_name: HEADER_ZUAR_SERVICE_NAME.to_string(),
            service_user_enabled: false,
        }
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self { self.cookie_name = name.into(); self }

    pub fn service_user_enabled(mut self, enabled: bool) -> Self { self.service_user_enabled = enabled; self }

    /// Decode `token`. `exp` is checked when present but not required.
    pub fn decode(&self, token: &str) -> Result<Record, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(self.algorithms.first().copied().unwrap_or(Algorithm::HS256));
        validation.algorithms = self.algorithms.clone();
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        let data = decode::<Record>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation)?;
        Ok(data.claims)
    }

    /// Token from the cookie, the query parameter or the `X-<cookie name>` header, in that order.
    fn token(&self, req: &Request) -> Option<String> {
        if let Some(token) = utils::cookie_value(req.headers(), &self.cookie_name) {
            return Some(token);
        }
        if let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(req.uri()) {
            if let Some(token) = params.get(&self.cookie_name).filter(|t| !t.is_empty()) {
                return Some(token.clone());
            }
        }
        req.headers()
            .get(format!("x-{}", self.cookie_name.to_lowercase()))
            .and_then(|v| v.to_str().ok())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// Decode a JWT (if present) into the request payload. Invalid tokens
/// leave the payload empty.
pub async fn jwt_payload(State(config): State<Arc<JwtConfig>>, mut req: Request, next: Next) -> Response {
    let mut claims = Record::new();
    match config.token(&req) {
        Some(token) => match config.decode(&token) {
            Ok(decoded) => claims = decoded,
            Err(e) => tracing::info!(error = %e, "JWT decode error"),
        },
        None => tracing::debug!(uri = %req.uri(), "no JWT"),
    }
    let service_name = service_name(req.headers(), &config.header_service_name, config.service_user_enabled, &claims);
    req.extensions_mut().insert(RequestPayload { claims, service_name });
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn payload_headers_are_collected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-payload-username", HeaderValue::from_static("alice"));
        headers.append("x-payload-scopes", HeaderValue::from_static("read"));
        headers.append("x-payload-scopes", HeaderValue::from_static("write"));
        headers.insert("x-other", HeaderValue::from_static("ignored"));

        let payload = payload_from_headers(&headers, &UpstreamPayloadConfig::default());
        assert_eq!(payload.claims["username"], "alice");
        assert_eq!(payload.claims["scopes"], serde_json::json!(["read", "write"]));
        assert!(!payload.claims.contains_key("other"));
        assert_eq!(payload.service_name, None);
    }

    #[test]
    fn service_header_needs_opt_in_and_no_payload() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_ZUAR_SERVICE_NAME, HeaderValue::from_static("reports"));
        let enabled = UpstreamPayloadConfig { service_user_enabled: true, ..Default::default() };

        assert_eq!(payload_from_headers(&headers, &UpstreamPayloadConfig::default()).service_name, None);
        assert_eq!(payload_from_headers(&headers, &enabled).service_name.as_deref(), Some("reports"));

        headers.insert("x-payload-username", HeaderValue::from_static("alice"));
        assert_eq!(payload_from_headers(&headers, &enabled).service_name, None);
    }

    #[test]
    fn tokens_without_exp_decode() {
        let config = JwtConfig::new("secret");
        let mut claims = Record::new();
        claims.insert("username".into(), "alice".into());
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS512),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(config.decode(&token).unwrap()["username"], "alice");
        assert!(JwtConfig::new("other").decode(&token).is_err());
    }
}
