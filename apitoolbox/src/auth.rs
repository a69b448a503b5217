//! Authentication from the request payload and scope based authorization.
//!
//! The payload middleware (JWT or upstream headers) stores a
//! [`RequestPayload`]; [`authenticate`] turns it into an [`AuthContext`];
//! [`require_scopes`] and the [`Authenticated`] extractor enforce it.

use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, Extensions},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bcrypt::{hash, verify, DEFAULT_COST};
use serde::Serialize;
use serde_json::Value;
use tokio::task;

use crate::{
    error::AppError,
    middleware::RequestPayload,
    models::{
        base::Record,
        session::Session,
        users::{self, UserModel},
    },
};

pub const ADMIN_SCOPE: &str = "*";

/// Bcrypt is CPU-bound; hashing runs on the blocking pool.
pub async fn hash_password(password: String) -> Result<String, AppError> {
    let hashed = task::spawn_blocking(move || hash(password, DEFAULT_COST))
        .await
        .map_err(|e| AppError::Bcrypt(e.to_string()))??;
    Ok(hashed)
}

pub async fn verify_password(password: String, hash_value: String) -> Result<bool, AppError> {
    let ok = task::spawn_blocking(move || verify(password, &hash_value))
        .await
        .map_err(|e| AppError::Bcrypt(e.to_string()))??;
    Ok(ok)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthUser {
    pub username: String,
    /// Dictionary form of the stored user, when one was looked up.
    pub record: Option<Record>,
}

impl AuthUser {
    pub fn simple(username: impl Into<String>) -> Self { Self { username: username.into(), record: None } }
}

/// Who made the request and what they may do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthContext {
    pub user: Option<AuthUser>,
    pub scopes: Vec<String>,
    pub service_name: Option<String>,
}

impl AuthContext {
    pub fn is_authenticated(&self) -> bool { self.user.is_some() }

    pub fn has_scope(&self, scope: &str) -> bool { self.scopes.iter().any(|s| s == scope) }
}

/// Looks up the user named in a payload.
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn resolve(&self, session: &Session, username: &str) -> Result<Option<AuthUser>, AppError>;
}

/// Resolves users of model `U` by username.
pub struct ModelUserResolver<U>(PhantomData<fn() -> U>);

impl<U> Default for ModelUserResolver<U> {
    fn default() -> Self { Self(PhantomData) }
}

#[async_trait]
impl<U: UserModel> UserResolver for ModelUserResolver<U> {
    async fn resolve(&self, session: &Session, username: &str) -> Result<Option<AuthUser>, AppError> {
        match users::get_by_username::<U>(session, username).await? {
            Some(user) => Ok(Some(AuthUser { username: user.username().to_string(), record: Some(user.as_dict()?) })),
            None => Ok(None),
        }
    }
}

/// Authenticates requests from their [`RequestPayload`].
#[derive(Clone)]
pub struct PayloadAuthBackend {
    resolver: Option<Arc<dyn UserResolver>>,
    admin_scope: String,
}

impl Default for PayloadAuthBackend {
    fn default() -> Self { Self { resolver: None, admin_scope: ADMIN_SCOPE.to_string() } }
}

impl PayloadAuthBackend {
    pub fn new() -> Self { Self::default() }

    /// Require the payload user to exist as a `U`.
    pub fn with_user_model<U: UserModel>(self) -> Self { self.with_resolver(Arc::new(ModelUserResolver::<U>::default())) }

    pub fn with_resolver(mut self, resolver: Arc<dyn UserResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_admin_scope(mut self, admin_scope: impl Into<String>) -> Self {
        self.admin_scope = admin_scope.into();
        self
    }

    /// Scopes from `scopes` (or else `permissions`): a list or a comma separated
    /// string. A list holding the admin scope collapses to just that scope.
    pub fn scopes(&self, claims: &Record) -> Vec<String> {
        let Some(raw) = claims.get("scopes").or_else(|| claims.get("permissions")) else {
            return Vec::new();
        };
        let scopes: Vec<String> = match raw {
            Value::String(s) => s.split(',').map(|token| token.trim().to_string()).collect(),
            Value::Array(items) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            _ => Vec::new(),
        };
        if !self.admin_scope.is_empty() && scopes.contains(&self.admin_scope) {
            return vec![self.admin_scope.clone()];
        }
        scopes
    }

    pub async fn authenticate(&self, extensions: &Extensions) -> Result<AuthContext, AppError> {
        let payload = extensions.get::<RequestPayload>().ok_or_else(|| {
            AppError::Configuration("Missing request payload: try adding the upstream payload or JWT middleware".into())
        })?;

        if let Some(service) = &payload.service_name {
            return Ok(AuthContext {
                user: Some(AuthUser::simple(format!("zuar_service_{service}"))),
                scopes: vec![ADMIN_SCOPE.to_string()],
                service_name: Some(service.clone()),
            });
        }

        let Some(username) = payload.claims.get("username").and_then(Value::as_str).filter(|u| !u.is_empty()) else {
            return Ok(AuthContext::default());
        };

        let user = match &self.resolver {
            Some(resolver) => {
                let session = extensions.get::<Arc<Session>>().ok_or_else(|| {
                    AppError::Configuration("Missing request session: try adding the session middleware".into())
                })?;
                match resolver.resolve(session, username).await? {
                    Some(user) => user,
                    None => {
                        tracing::warn!(username, "User not found");
                        return Ok(AuthContext::default());
                    }
                }
            }
            None => AuthUser::simple(username),
        };

        Ok(AuthContext { user: Some(user), scopes: self.scopes(&payload.claims), service_name: None })
    }
}

/// Middleware storing the request's [`AuthContext`].
pub async fn authenticate(State(backend): State<Arc<PayloadAuthBackend>>, mut req: Request, next: Next) -> Response {
    match backend.authenticate(req.extensions()).await {
        Ok(context) => {
            req.extensions_mut().insert(context);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Authenticated,
    All(Vec<String>),
    Any(Vec<String>),
    Admin,
}

/// Authorization rule checked against the request's [`AuthContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeValidator {
    requirement: Requirement,
    admin_scope: String,
}

impl ScopeValidator {
    fn with(requirement: Requirement) -> Self { Self { requirement, admin_scope: ADMIN_SCOPE.to_string() } }

    pub fn authenticated() -> Self { Self::with(Requirement::Authenticated) }

    /// Every one of `scopes` is required.
    pub fn all<S: Into<String>>(scopes: impl IntoIterator<Item = S>) -> Self {
        Self::with(Requirement::All(scopes.into_iter().map(Into::into).collect()))
    }

    /// At least one of `scopes` is required.
    pub fn any<S: Into<String>>(scopes: impl IntoIterator<Item = S>) -> Self {
        Self::with(Requirement::Any(scopes.into_iter().map(Into::into).collect()))
    }

    /// The admin scope is required; internal service requests pass.
    pub fn admin() -> Self { Self::with(Requirement::Admin) }

    pub fn admin_scope(mut self, admin_scope: impl Into<String>) -> Self {
        self.admin_scope = admin_scope.into();
        self
    }

    pub fn is_admin(&self, context: &AuthContext) -> bool {
        !self.admin_scope.is_empty() && context.has_scope(&self.admin_scope)
    }

    /// 401 when unauthenticated (or no context at all), 403 when a scope is missing.
    pub fn validate(&self, context: Option<&AuthContext>) -> Result<(), AppError> {
        let context = match context {
            Some(context) if context.is_authenticated() => context,
            _ => return Err(AppError::Unauthorized("authentication required".into())),
        };
        let allowed = match &self.requirement {
            Requirement::Authenticated => true,
            Requirement::All(scopes) => self.is_admin(context) || scopes.iter().all(|s| context.has_scope(s)),
            Requirement::Any(scopes) => self.is_admin(context) || scopes.iter().any(|s| context.has_scope(s)),
            Requirement::Admin => context.service_name.is_some() || self.is_admin(context),
        };
        if allowed {
            Ok(())
        } else {
            Err(AppError::Forbidden("insufficient scope".into()))
        }
    }
}

/// Middleware rejecting requests the validator does not allow.
pub async fn require_scopes(State(validator): State<Arc<ScopeValidator>>, req: Request, next: Next) -> Response {
    match validator.validate(req.extensions().get::<AuthContext>()) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Extractor for an authenticated caller.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts.extensions.get::<AuthContext>();
        ScopeValidator::authenticated().validate(context)?;
        Ok(Authenticated(context.cloned().unwrap_or_default()))
    }
}
