//! The demo application router, shared by the binary and the integration tests.

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use serde_json::json;

use crate::{
    auth::{self, PayloadAuthBackend, ScopeValidator},
    endpoints::{
        groups_router, permissions_router, users_router, AssetManager, ConfirmEndpoint, LoginEndpoint, LogoutEndpoint,
        RegisterEndpoint,
    },
    error::AppError,
    mail::Mailer,
    middleware::{self, JwtConfig, SessionPool},
    models::{Group, Metadata, Permission, User},
    settings::Settings,
};

async fn health() -> Json<serde_json::Value> { Json(json!({ "status": "ok" })) }

/// Route the confirmation endpoint serves; absolute confirm urls point elsewhere.
fn confirm_path(confirm_url: &str) -> &str {
    if confirm_url.starts_with('/') { confirm_url } else { "/confirm" }
}

/// Every built-in endpoint. Management routes under `/api` need the admin scope.
///
/// `pool` is a fixed [`sqlx::SqlitePool`] or a [`SessionPool::Registry`] lookup.
pub fn app(settings: &Settings, pool: impl Into<SessionPool>, metadata: Arc<Metadata>, mailer: Option<Arc<dyn Mailer>>) -> Result<Router, AppError> {
    let management = Router::new()
        .nest("/users", users_router::<User, Permission>(metadata.clone()))
        .nest("/groups", groups_router::<Group, User, Permission>(metadata))
        .nest("/permissions", permissions_router::<Permission>())
        .route_layer(from_fn_with_state(Arc::new(ScopeValidator::admin()), auth::require_scopes));

    let jwt = JwtConfig::new(settings.jwt.secret.clone())
        .cookie_name(settings.jwt.cookie_name.clone())
        .service_user_enabled(settings.jwt.service_user_enabled);
    let backend = PayloadAuthBackend::new().with_user_model::<User>();
    let sessions: SessionPool = pool.into();

    Ok(Router::new()
        .nest("/api", management)
        .merge(LoginEndpoint::<User>::from_settings(settings)?.register_url("/register").router("/login"))
        .merge(LogoutEndpoint::new().cookie_name(settings.jwt.cookie_name.clone()).router("/logout"))
        .merge(RegisterEndpoint::<User>::from_settings(settings, mailer).router("/register"))
        .merge(ConfirmEndpoint::<User>::from_settings(settings).router(confirm_path(&settings.registration.confirm_url)))
        .merge(AssetManager::new(settings.assets.document_root.clone()).router("/assets"))
        .route("/healthz", get(health))
        .layer(from_fn_with_state(Arc::new(backend), auth::authenticate))
        .layer(from_fn_with_state(Arc::new(jwt), middleware::jwt_payload))
        .layer(from_fn_with_state(sessions, middleware::session)))
}
