//! Ready-made routers: CRUD over the built-in models, login, logout,
//! registration with email confirmation, and a static asset listing.
//!
//! Every router expects the session middleware (and, for anything behind a
//! [`ScopeValidator`](crate::auth::ScopeValidator), the authentication
//! middleware) to be layered on by the application.

pub mod assets;
pub mod base;
pub mod confirm;
pub mod groups;
pub mod login;
pub mod logout;
pub mod permissions;
pub mod register;
pub mod users;

pub use assets::{AssetEntry, AssetManager};
pub use base::{crud_router, BaseCrudEndpoint};
pub use confirm::ConfirmEndpoint;
pub use groups::{groups_router, GroupsEndpoint};
pub use login::{LoginEndpoint, LoginForm};
pub use logout::LogoutEndpoint;
pub use permissions::permissions_router;
pub use register::{RegisterEndpoint, RegisterForm};
pub use users::{users_router, UsersEndpoint};

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use uuid::Uuid;

use crate::{
    crud,
    error::AppError,
    models::{
        associations::AssociationTable,
        base::{Entity, Record},
        relations,
        session::{Session, Statement},
        types::{self, SqlValue},
    },
    utils::{self, Template},
};

/// Render `custom` (a path or inline template) when set, else the built-in text.
/// Values are inserted as given.
pub(crate) async fn render_text(custom: Option<&str>, builtin: &str, vars: &[(&str, &str)]) -> Result<String, AppError> {
    match custom {
        Some(template) => utils::render(template, vars).await,
        None => Ok(Template::new(builtin).safe_substitute(vars)),
    }
}

/// Like [`render_text`] for HTML: `vars` are escaped, `markup` is trusted.
pub(crate) async fn render_template(
    custom: Option<&str>,
    builtin: &str,
    vars: &[(&str, &str)],
    markup: &[(&str, &str)],
) -> Result<String, AppError> {
    let escaped: Vec<(&str, String)> = vars.iter().map(|(name, value)| (*name, utils::escape_html(value))).collect();
    let all: Vec<(&str, &str)> = escaped
        .iter()
        .map(|(name, value)| (*name, value.as_str()))
        .chain(markup.iter().copied())
        .collect();
    render_text(custom, builtin, &all).await
}

pub(crate) fn html(status: StatusCode, body: String) -> Response { (status, Html(body)).into_response() }

/// Rows of `T` whose ids are in `ids`, ordered by id.
pub(crate) async fn fetch_many<T: Entity>(session: &Session, ids: &[Uuid]) -> Result<Vec<T>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let table = T::table();
    let placeholders = vec!["?"; ids.len()].join(", ");
    let statement = Statement::new(format!(
        "SELECT {} FROM \"{}\" WHERE \"id\" IN ({placeholders}) ORDER BY \"id\"",
        table.select_list(None),
        table.name
    ))
    .bind_all(ids.iter().map(|id| SqlValue::Text(types::guid_to_db(id))));
    let rows = session.fetch_all(&statement).await?;
    rows.iter().map(|row| crud::entity_from_row(&table, row)).collect()
}

/// Replace the `T` rows linked to `owner_id`, refusing unknown ids with 422,
/// then commit. Returns the new set as dictionaries.
pub(crate) async fn replace_related<T: Entity>(
    session: &Session,
    association: &AssociationTable,
    owner_id: Uuid,
    mut ids: Vec<Uuid>,
    label: &str,
) -> Result<Vec<Record>, AppError> {
    ids.sort();
    ids.dedup();
    let found = fetch_many::<T>(session, &ids).await?;
    if found.len() != ids.len() {
        let found_ids: Vec<Uuid> = found.iter().map(|t| t.id()).collect();
        let missing: Vec<String> = relations::missing_ids(&ids, &found_ids).iter().map(Uuid::to_string).collect();
        return Err(AppError::Unprocessable(format!("Invalid {label} IDs: [{}]", missing.join(", "))));
    }
    relations::set_related::<T>(session, association, owner_id, &ids).await?;
    session.commit().await?;
    found.iter().map(|t| t.as_dict()).collect()
}
