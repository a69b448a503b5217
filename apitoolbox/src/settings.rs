//! Typed settings loaded with the `config` crate.
//!
//! Sources, later ones overriding earlier: built-in defaults, an optional
//! `apitoolbox.toml` (or the file named by `APITOOLBOX_CONFIG`), then
//! environment variables such as `APITOOLBOX__JWT__SECRET` or
//! `APITOOLBOX__SERVER__PORT`.

use std::path::PathBuf;

use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use jsonwebtoken::Algorithm;
use serde::Deserialize;

use crate::{db_registry::DbRegistrySettings, error::AppError, utils};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty allows any.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub pre_ping: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    pub secret: String,
    pub cookie_name: String,
    pub algorithm: String,
    /// Seconds a login token stays valid.
    pub token_expiry: i64,
    pub secure_cookie: bool,
    /// Honour the internal-service header when no payload is present.
    pub service_user_enabled: bool,
}

impl JwtSettings {
    pub fn algorithm(&self) -> Result<Algorithm, AppError> { utils::parse_algorithm(&self.algorithm) }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    /// Registration sends confirmation mails only when a sender is set.
    pub sender: Option<String>,
    pub server: String,
    /// 0 selects the transport's default port.
    pub port: u16,
    pub ssl: bool,
    pub tls: bool,
    pub login: Option<String>,
    pub password: Option<String>,
    pub subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetSettings {
    pub document_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationSettings {
    /// Login refuses accounts whose email is not confirmed.
    pub require_confirmation: bool,
    pub confirm_url: String,
    /// Seconds a confirmation link stays valid; unset never expires.
    pub confirm_max_age: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    pub db_registry: DbRegistrySettings,
    pub email: EmailSettings,
    pub assets: AssetSettings,
    pub registration: RegistrationSettings,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, AppError> {
    Ok(Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("server.cors_origins", Vec::<String>::new())?
        .set_default("database.url", "sqlite://apitoolbox.db")?
        .set_default("database.max_connections", 10)?
        .set_default("database.pre_ping", true)?
        .set_default("jwt.secret", "")?
        .set_default("jwt.cookie_name", "jwt")?
        .set_default("jwt.algorithm", "HS256")?
        .set_default("jwt.token_expiry", 86_400)?
        .set_default("jwt.secure_cookie", true)?
        .set_default("jwt.service_user_enabled", false)?
        .set_default("db_registry.refresh_on_get", false)?
        .set_default("db_registry.remove_item_strategy", "default")?
        .set_default("email.server", "localhost")?
        .set_default("email.port", 0)?
        .set_default("email.ssl", false)?
        .set_default("email.tls", false)?
        .set_default("email.subject", "Email confirmation")?
        .set_default("assets.document_root", ".")?
        .set_default("registration.require_confirmation", false)?
        .set_default("registration.confirm_url", "/confirm")?)
}

impl Settings {
    /// Load from the default sources.
    pub fn load() -> Result<Self, AppError> {
        let file = std::env::var("APITOOLBOX_CONFIG").unwrap_or_else(|_| "apitoolbox".to_string());
        Self::load_from(Some(&file))
    }

    /// Load with an optional settings file (extension may be omitted).
    pub fn load_from(file: Option<&str>) -> Result<Self, AppError> {
        let mut builder = defaults()?;
        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("APITOOLBOX")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.jwt.secret.is_empty() {
            return Err(AppError::Configuration("jwt.secret is required (set APITOOLBOX__JWT__SECRET)".into()));
        }
        if self.jwt.token_expiry <= 0 {
            return Err(AppError::Configuration("jwt.token_expiry must be positive".into()));
        }
        self.jwt.algorithm()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_registry::RemoveItemStrategyKind;

    fn write(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            &dir,
            r#"
            [jwt]
            secret = "s3cret"
            token_expiry = 60

            [db_registry]
            cleanup_interval = 30
            remove_item_strategy = "dispose_engine"

            [email]
            sender = "noreply@example.org"
            "#,
        );
        let settings = Settings::load_from(Some(&file)).unwrap();
        assert_eq!(settings.jwt.secret, "s3cret");
        assert_eq!(settings.jwt.token_expiry, 60);
        assert_eq!(settings.jwt.cookie_name, "jwt");
        assert!(settings.jwt.secure_cookie);
        assert_eq!(settings.db_registry.cleanup_interval, Some(30.0));
        assert_eq!(settings.db_registry.remove_item_strategy, RemoveItemStrategyKind::DisposeEngine);
        assert_eq!(settings.email.sender.as_deref(), Some("noreply@example.org"));
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn missing_secret_and_bad_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = write(&dir, "[server]\nport = 9000\n");
        assert!(matches!(Settings::load_from(Some(&missing)), Err(AppError::Configuration(_))));

        let bad_strategy = write(&dir, "[jwt]\nsecret = \"x\"\n[db_registry]\nremove_item_strategy = \"bogus\"\n");
        assert!(matches!(Settings::load_from(Some(&bad_strategy)), Err(AppError::Configuration(_))));

        let bad_alg = write(&dir, "[jwt]\nsecret = \"x\"\nalgorithm = \"RS256\"\n");
        assert!(matches!(Settings::load_from(Some(&bad_alg)), Err(AppError::Configuration(_))));
    }
}
