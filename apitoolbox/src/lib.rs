//! Authentication, filtering and CRUD scaffolding for axum services backed by SQLite.
pub mod auth;
pub mod crud;
pub mod db_registry;
pub mod endpoints;
pub mod error;
pub mod filters;
pub mod mail;
pub mod middleware;
pub mod models;
pub mod registry;
pub mod server;
pub mod settings;
pub mod signing;
pub mod types;
pub mod tz;
pub mod utils;

pub use error::AppError;
