//! User model and the traits login/registration are written against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{auth, crud, error::AppError, tz};

use super::{
    base::{Column, Entity, Record},
    mixins,
    session::Session,
    types::ColumnType,
};

/// A user account: unique lower-cased username plus an optional password hash.
pub trait UserModel: Entity {
    fn username(&self) -> &str;

    fn hashed_password(&self) -> Option<&str>;

    fn set_hashed_password(&mut self, hash: Option<String>);

    /// Accounts without a confirmation concept are always confirmed.
    fn is_confirmed(&self) -> bool { true }
}

/// Users that register with an email address which must be confirmed.
pub trait ConfirmationModel: UserModel {
    fn email(&self) -> &str;

    fn confirmed_at(&self) -> Option<DateTime<Utc>>;

    fn set_confirmed_at(&mut self, at: Option<DateTime<Utc>>);

    /// A fresh, unconfirmed account.
    fn new_registration(username: &str, email: &str) -> Self;

    fn confirmed(&self) -> bool { self.confirmed_at().is_some() }
}

/// Hash `secret` and store it on `user`.
pub async fn set_password<U: UserModel>(user: &mut U, secret: &str) -> Result<(), AppError> {
    let hash = auth::hash_password(secret.to_string()).await?;
    user.set_hashed_password(Some(hash));
    Ok(())
}

/// Verify a provided secret against the stored hash. No hash never verifies.
pub async fn verify<U: UserModel>(user: &U, secret: &str) -> Result<bool, AppError> {
    match user.hashed_password() {
        Some(hash) => auth::verify_password(secret.to_string(), hash.to_string()).await,
        None => Ok(false),
    }
}

/// Case-insensitive username lookup.
pub async fn get_by_username<U: UserModel>(session: &Session, username: &str) -> Result<Option<U>, AppError> {
    crud::find_by::<U>(session, "username", serde_json::Value::String(username.to_lowercase())).await
}

pub async fn get_by_email<U: ConfirmationModel>(session: &Session, email: &str) -> Result<Option<U>, AppError> {
    crud::find_by::<U>(session, "email", serde_json::Value::String(email.to_string())).await
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub hashed_password: Option<String>,
    pub email: String,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: &str, email: &str) -> Self {
        let now = tz::utcnow();
        Self {
            id: Uuid::new_v4(),
            username: username.to_lowercase(),
            hashed_password: None,
            email: email.to_string(),
            confirmed_at: None,
            updated_at: now,
            created_at: now,
        }
    }

    /// Identity used for authentication contexts.
    pub fn identity(&self) -> String { self.id.to_string() }
}

impl Entity for User {
    const TABLE: &'static str = "users";

    fn columns() -> Vec<Column> {
        let mut own = vec![
            Column::new("username", ColumnType::String).not_null().unique(),
            Column::new("hashed_password", ColumnType::String),
        ];
        own.extend(mixins::confirmation_columns());
        mixins::with_guid_and_timestamps(own)
    }

    fn id(&self) -> Uuid { self.id }

    fn normalize(&mut self) { self.username = self.username.to_lowercase(); }

    fn as_dict(&self) -> Result<Record, AppError> {
        let mut record = self.to_record()?;
        record.remove("hashed_password");
        Ok(record)
    }
}

impl UserModel for User {
    fn username(&self) -> &str { &self.username }
    fn hashed_password(&self) -> Option<&str> { self.hashed_password.as_deref() }
    fn set_hashed_password(&mut self, hash: Option<String>) { self.hashed_password = hash; }
    fn is_confirmed(&self) -> bool { self.confirmed_at.is_some() }
}

impl ConfirmationModel for User {
    fn email(&self) -> &str { &self.email }
    fn confirmed_at(&self) -> Option<DateTime<Utc>> { self.confirmed_at }
    fn set_confirmed_at(&mut self, at: Option<DateTime<Utc>>) { self.confirmed_at = at; }
    fn new_registration(username: &str, email: &str) -> Self { User::new(username, email) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_dict_hides_the_password_hash() {
        let mut user = User::new("Alice", "alice@example.org");
        user.hashed_password = Some("hash".into());
        let dict = user.as_dict().unwrap();
        assert!(!dict.contains_key("hashed_password"));
        assert_eq!(dict["username"], "alice");
        assert!(user.to_record().unwrap().contains_key("hashed_password"));
    }

    #[tokio::test]
    async fn password_is_hashed_and_verified() {
        let mut user = User::new("bob", "bob@example.org");
        assert!(!verify(&user, "anything").await.unwrap());
        set_password(&mut user, "test123").await.unwrap();
        assert_ne!(user.hashed_password.as_deref(), Some("test123"));
        assert!(verify(&user, "test123").await.unwrap());
        assert!(!verify(&user, "test1234").await.unwrap());
    }

    #[test]
    fn confirmation_state_follows_timestamp() {
        let mut user = User::new_registration("carol", "carol@example.org");
        assert!(!user.confirmed());
        user.set_confirmed_at(Some(tz::utcnow()));
        assert!(user.confirmed());
        assert!(user.is_confirmed());
    }

    #[test]
    fn email_is_required_and_unique() {
        let table = User::table();
        let email = table.column("email").unwrap();
        assert!(!email.nullable);
        assert!(email.unique);
    }
}
