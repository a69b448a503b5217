//! Small helpers shared by the endpoints and the server binary.

use std::{str::FromStr, time::Duration};

use axum::http::{header, HeaderMap};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::{error::AppError, models::base::Record};

/// A `$name` / `${name}` template. `$$` is a literal dollar sign and
/// placeholders without a value are left as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template(String);

fn is_ident_start(c: char) -> bool { c == '_' || c.is_ascii_alphabetic() }
fn is_ident(c: char) -> bool { c == '_' || c.is_ascii_alphanumeric() }

impl Template {
    pub fn new(text: impl Into<String>) -> Self { Self(text.into()) }

    pub fn safe_substitute(&self, vars: &[(&str, &str)]) -> String {
        let lookup = |name: &str| vars.iter().rev().find(|(k, _)| *k == name).map(|(_, v)| *v);
        let text = &self.0;
        let mut out = String::with_capacity(text.len());
        let mut rest = text.as_str();
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            if let Some(tail) = after.strip_prefix('$') {
                out.push('$');
                rest = tail;
            } else if let Some(braced) = after.strip_prefix('{') {
                let end = braced.find('}').filter(|&end| {
                    let name = &braced[..end];
                    name.starts_with(is_ident_start) && name.chars().all(is_ident)
                });
                match end.and_then(|end| lookup(&braced[..end]).map(|v| (end, v))) {
                    Some((end, value)) => {
                        out.push_str(value);
                        rest = &braced[end + 1..];
                    }
                    None => {
                        out.push('$');
                        rest = after;
                    }
                }
            } else {
                let len = if after.starts_with(is_ident_start) {
                    after.find(|c: char| !is_ident(c)).unwrap_or(after.len())
                } else {
                    0
                };
                match lookup(&after[..len]).filter(|_| len > 0) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('$');
                        out.push_str(&after[..len]);
                    }
                }
                rest = &after[len..];
            }
        }
        out.push_str(rest);
        out
    }
}

/// Escape `value` for use in HTML text and quoted attribute values.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Render a template given inline (text starting with `<`) or as a file path.
pub async fn render(path_or_template: &str, vars: &[(&str, &str)]) -> Result<String, AppError> {
    let template = if path_or_template.starts_with('<') {
        Template::new(path_or_template)
    } else {
        Template::new(tokio::fs::read_to_string(path_or_template).await?)
    };
    Ok(template.safe_substitute(vars))
}

/// Encode `payload` as a JWT. The payload must carry an `exp` claim.
pub fn jwt_encode(payload: &Record, secret: &str, algorithm: Algorithm) -> Result<String, AppError> {
    if !payload.contains_key("exp") {
        return Err(AppError::Validation("JWT payload requires an 'exp' claim".into()));
    }
    Ok(encode(&Header::new(algorithm), payload, &EncodingKey::from_secret(secret.as_bytes()))?)
}

pub fn parse_algorithm(name: &str) -> Result<Algorithm, AppError> {
    match Algorithm::from_str(name) {
        Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => Ok(alg),
        _ => Err(AppError::Configuration(format!("unsupported JWT algorithm: {name}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub max_connections: u32,
    /// Check a connection is alive before handing it out.
    pub pre_ping: bool,
}

impl Default for EngineOptions {
    fn default() -> Self { Self { max_connections: 10, pre_ping: true } }
}

fn is_memory_url(url: &str) -> bool { url.contains(":memory:") || url.contains("mode=memory") }

/// Connect a pool with per-backend defaults.
///
/// In-memory SQLite gets a single connection that is never recycled (each
/// connection would otherwise see its own empty database). File databases
/// use WAL with a busy timeout. Other backends are rejected.
pub async fn create_engine(url: &str, options: EngineOptions) -> Result<SqlitePool, AppError> {
    if !url.starts_with("sqlite:") {
        let backend = url.split(':').next().unwrap_or(url);
        return Err(AppError::Configuration(format!("unsupported database backend: {backend}")));
    }
    let connect = SqliteConnectOptions::from_str(url)
        .map_err(|e| AppError::Configuration(format!("invalid database url {url}: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = if is_memory_url(url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .test_before_acquire(options.pre_ping)
            .connect_with(connect)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .test_before_acquire(options.pre_ping)
            .connect_with(connect.journal_mode(SqliteJournalMode::Wal).busy_timeout(Duration::from_secs(5)))
            .await?
    };
    tracing::debug!(url, "database engine created");
    Ok(pool)
}

/// A version 1 uuid rearranged so that its hex form sorts by creation time
/// (time_hi, time_mid, time_low, then the rest).
pub fn ordered_uuid(value: Option<Uuid>) -> Uuid {
    let source = value.unwrap_or_else(|| {
        let random = Uuid::new_v4();
        let mut node = [0u8; 6];
        node.copy_from_slice(&random.as_bytes()[..6]);
        Uuid::now_v1(&node)
    });
    let b = source.as_bytes();
    let mut ordered = [0u8; 16];
    ordered[0..2].copy_from_slice(&b[6..8]);
    ordered[2..4].copy_from_slice(&b[4..6]);
    ordered[4..8].copy_from_slice(&b[0..4]);
    ordered[8..16].copy_from_slice(&b[8..16]);
    Uuid::from_bytes(ordered)
}

/// `scheme://host/` of the request as the client saw it.
pub fn base_url(headers: &HeaderMap) -> String {
    let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(|v| v.split(',').next().unwrap_or(v).trim().to_string());
    let scheme = value("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = value("x-forwarded-host")
        .or_else(|| value(header::HOST.as_str()))
        .unwrap_or_else(|| "localhost".to_string());
    format!("{scheme}://{host}/")
}

/// Value of cookie `name` from the `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.trim_matches('"').to_string())
}

/// A deliberately loose check: one `@`, a non-empty local part and a dotted domain.
pub fn validate_email(email: &str) -> Result<String, AppError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
                && email.len() <= 254
        }
        None => false,
    };
    if valid {
        Ok(email.to_string())
    } else {
        Err(AppError::Validation("value is not a valid email address".into()))
    }
}
