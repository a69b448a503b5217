//! Unit-of-work session over a connection pool.
//!
//! The first statement begins a transaction which stays open until
//! [`Session::commit`] or [`Session::rollback`]. Closing (or dropping) a
//! session discards anything not committed.

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use sqlx::{
    query::Query,
    sqlite::{SqliteArguments, SqlitePool, SqliteRow},
    Sqlite, Transaction,
};
use tokio::sync::Mutex;

use crate::error::AppError;

use super::types::SqlValue;

/// SQL text plus positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self { Self { sql: sql.into(), params: Vec::new() } }

    pub fn bind(mut self, value: SqlValue) -> Self { self.params.push(value); self }

    pub fn bind_all(mut self, values: impl IntoIterator<Item = SqlValue>) -> Self {
        self.params.extend(values);
        self
    }

    fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for value in &self.params {
            query = match value {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Integer(v) => query.bind(*v),
                SqlValue::Real(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.clone()),
            };
        }
        query
    }
}

pub struct Session {
    pool: SqlitePool,
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl Session {
    pub fn new(pool: SqlitePool) -> Self { Self { pool, tx: Mutex::new(None) } }

    pub fn pool(&self) -> &SqlitePool { &self.pool }

    /// Whether a transaction is currently open.
    pub async fn in_transaction(&self) -> bool { self.tx.lock().await.is_some() }

    pub async fn execute(&self, statement: &Statement) -> Result<u64, AppError> {
        let mut guard = self.tx.lock().await;
        if guard.is_none() {
            *guard = Some(self.pool.begin().await?);
        }
        let tx = guard.as_mut().ok_or_else(|| AppError::Database("transaction unavailable".into()))?;
        let result = statement.query().execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(&self, statement: &Statement) -> Result<Vec<SqliteRow>, AppError> {
        let mut guard = self.tx.lock().await;
        if guard.is_none() {
            *guard = Some(self.pool.begin().await?);
        }
        let tx = guard.as_mut().ok_or_else(|| AppError::Database("transaction unavailable".into()))?;
        Ok(statement.query().fetch_all(&mut **tx).await?)
    }

    pub async fn fetch_optional(&self, statement: &Statement) -> Result<Option<SqliteRow>, AppError> {
        let mut guard = self.tx.lock().await;
        if guard.is_none() {
            *guard = Some(self.pool.begin().await?);
        }
        let tx = guard.as_mut().ok_or_else(|| AppError::Database("transaction unavailable".into()))?;
        Ok(statement.query().fetch_optional(&mut **tx).await?)
    }

    pub async fn commit(&self) -> Result<(), AppError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn rollback(&self) -> Result<(), AppError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    /// Roll back whatever is pending and release the connection.
    pub async fn close(&self) {
        if let Err(e) = self.rollback().await {
            tracing::warn!(error = %e, "session rollback on close failed");
        }
    }
}

/// Extractor for the request's session, installed by the session middleware.
///
/// ```ignore
/// async fn handler(DbSession(session): DbSession) { /* ... */ }
/// ```
#[derive(Clone)]
pub struct DbSession(pub Arc<Session>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for DbSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        get_session(parts).map(DbSession)
    }
}

/// The request's session.
pub fn get_session(parts: &Parts) -> Result<Arc<Session>, AppError> {
    parts
        .extensions
        .get::<Arc<Session>>()
        .cloned()
        .ok_or_else(|| AppError::Configuration("Missing request session: try adding the session middleware".into()))
}
