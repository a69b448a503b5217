//! Self-service registration with optional email confirmation.
//!
//! Without a sender address accounts are confirmed immediately and the
//! browser is redirected. With one, a signed link is mailed and the
//! account stays unconfirmed until [`ConfirmEndpoint`](super::ConfirmEndpoint)
//! sees it.

use std::{marker::PhantomData, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use serde::Deserialize;

use crate::{
    crud,
    error::AppError,
    mail::{EmailMessage, Mailer},
    models::{
        session::{DbSession, Session},
        users::{self, ConfirmationModel},
    },
    settings::Settings,
    signing::TimedSerializer,
    tz, utils,
};

use super::{html, render_template, render_text};

const REGISTER_TEMPLATE: &str = include_str!("templates/register.html");
const SENT_TEMPLATE: &str = include_str!("templates/send_confirmation.html");
const EMAIL_HTML_TEMPLATE: &str = include_str!("templates/confirmation_email.html");
const EMAIL_TEXT_TEMPLATE: &str = include_str!("templates/confirmation_email.txt");

pub const MIN_PASSWORD_LENGTH: usize = 7;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: Option<String>,
}

pub struct RegisterEndpoint<U> {
    serializer: TimedSerializer,
    mailer: Option<Arc<dyn Mailer>>,
    sender: Option<String>,
    subject: String,
    confirm_url: String,
    location: String,
    title: String,
    modal_title: String,
    form_action: String,
    template: Option<String>,
    sent_template: Option<String>,
    email_html_template: Option<String>,
    email_text_template: Option<String>,
    _user: PhantomData<fn() -> U>,
}

/// Join `confirm_url` and `token`; relative urls are made absolute with `base_url`.
fn confirmation_link(base_url: &str, confirm_url: &str, token: &str) -> String {
    let mut url = confirm_url.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(token);
    if url.contains("://") {
        url
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), url.trim_start_matches('/'))
    }
}

impl<U: ConfirmationModel> RegisterEndpoint<U> {
    /// `secret` signs the confirmation tokens.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            serializer: TimedSerializer::new(secret),
            mailer: None,
            sender: None,
            subject: "Email confirmation".into(),
            confirm_url: "/confirm".into(),
            location: "/".into(),
            title: "APIToolbox".into(),
            modal_title: "Register".into(),
            form_action: "/register".into(),
            template: None,
            sent_template: None,
            email_html_template: None,
            email_text_template: None,
            _user: PhantomData,
        }
    }

    /// Confirmation mails are sent only when `settings.email.sender` is set.
    pub fn from_settings(settings: &Settings, mailer: Option<Arc<dyn Mailer>>) -> Self {
        let endpoint = Self::new(settings.jwt.secret.as_bytes())
            .subject(settings.email.subject.clone())
            .confirm_url(settings.registration.confirm_url.clone());
        match (mailer, &settings.email.sender) {
            (Some(mailer), Some(sender)) => endpoint.with_mailer(mailer, sender.clone()),
            _ => endpoint,
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>, sender: impl Into<String>) -> Self {
        self.mailer = Some(mailer);
        self.sender = Some(sender.into());
        self
    }

    pub fn serializer(mut self, serializer: TimedSerializer) -> Self { self.serializer = serializer; self }
    pub fn subject(mut self, subject: impl Into<String>) -> Self { self.subject = subject.into(); self }
    pub fn confirm_url(mut self, url: impl Into<String>) -> Self { self.confirm_url = url.into(); self }
    /// Redirect target when no confirmation is needed.
    pub fn location(mut self, location: impl Into<String>) -> Self { self.location = location.into(); self }
    pub fn title(mut self, title: impl Into<String>) -> Self { self.title = title.into(); self }
    pub fn form_action(mut self, action: impl Into<String>) -> Self { self.form_action = action.into(); self }
    pub fn template(mut self, template: impl Into<String>) -> Self { self.template = Some(template.into()); self }
    pub fn sent_template(mut self, template: impl Into<String>) -> Self { self.sent_template = Some(template.into()); self }

    pub fn email_templates(mut self, html: impl Into<String>, text: impl Into<String>) -> Self {
        self.email_html_template = Some(html.into());
        self.email_text_template = Some(text.into());
        self
    }

    pub fn email_confirmation_required(&self) -> bool { self.mailer.is_some() && self.sender.is_some() }

    pub async fn render(&self, username: &str, email: &str, error: &str) -> Result<String, AppError> {
        let vars = [
            ("title", self.title.as_str()),
            ("modal_title", self.modal_title.as_str()),
            ("form_action", self.form_action.as_str()),
            ("username", username),
            ("email", email),
            ("error", error),
        ];
        render_template(self.template.as_deref(), REGISTER_TEMPLATE, &vars, &[]).await
    }

    async fn form_error(&self, status: StatusCode, form: &RegisterForm, error: &str) -> Result<Response, AppError> {
        Ok(html(status, self.render(&form.username, &form.email, error).await?))
    }

    pub async fn on_get(&self) -> Result<Response, AppError> {
        Ok(html(StatusCode::OK, self.render("", "", "").await?))
    }

    /// Mail a confirmation link for `email` to `email`.
    pub async fn send_email_confirmation(&self, base_url: &str, username: &str, email: &str) -> Result<(), AppError> {
        let (Some(mailer), Some(sender)) = (&self.mailer, &self.sender) else {
            return Err(AppError::Configuration("no mailer configured".into()));
        };
        let token = self.serializer.dumps(&email)?;
        let confirm_url = confirmation_link(base_url, &self.confirm_url, &token);
        let vars = [
            ("username", username),
            ("email", email),
            ("sender", sender.as_str()),
            ("subject", self.subject.as_str()),
            ("base_url", base_url),
            ("confirm_url", confirm_url.as_str()),
        ];
        let message = EmailMessage {
            subject: self.subject.clone(),
            from: sender.clone(),
            to: vec![email.to_string()],
            text: render_text(self.email_text_template.as_deref(), EMAIL_TEXT_TEMPLATE, &vars).await?,
            html: render_template(self.email_html_template.as_deref(), EMAIL_HTML_TEMPLATE, &vars, &[]).await?,
        };
        mailer.send(&message).await
    }

    pub async fn on_post(&self, session: &Session, headers: &HeaderMap, mut form: RegisterForm) -> Result<Response, AppError> {
        form.email = match utils::validate_email(&form.email) {
            Ok(email) => email,
            Err(_) => return self.form_error(StatusCode::BAD_REQUEST, &form, "value is not a valid email address").await,
        };
        if form.password.chars().count() < MIN_PASSWORD_LENGTH {
            let error = format!("Invalid password - the password must be at least {MIN_PASSWORD_LENGTH} characters.");
            return self.form_error(StatusCode::BAD_REQUEST, &form, &error).await;
        }
        if form.confirm_password.as_deref().is_some_and(|confirm| confirm != form.password) {
            return self.form_error(StatusCode::BAD_REQUEST, &form, "The specified passwords do not match.").await;
        }

        let confirmation_required = self.email_confirmation_required();
        let written = match users::get_by_email::<U>(session, &form.email).await? {
            Some(mut user) => {
                if user.username() != form.username.to_lowercase() {
                    return self.form_error(StatusCode::CONFLICT, &form, "That email address already exists.").await;
                }
                if user.confirmed() {
                    tracing::info!(username = user.username(), "re-registration of a confirmed account");
                } else {
                    users::set_password(&mut user, &form.password).await?;
                }
                if !confirmation_required && !user.confirmed() {
                    user.set_confirmed_at(Some(tz::utcnow()));
                }
                crud::save(session, &mut user).await
            }
            None => {
                let mut user = U::new_registration(&form.username, &form.email);
                users::set_password(&mut user, &form.password).await?;
                if !confirmation_required {
                    user.set_confirmed_at(Some(tz::utcnow()));
                }
                crud::insert(session, &mut user).await
            }
        };
        match written {
            Ok(()) => session.commit().await?,
            Err(AppError::Conflict(_)) => {
                session.rollback().await?;
                return self.form_error(StatusCode::CONFLICT, &form, "That username already exists.").await;
            }
            Err(e) => return Err(e),
        }
        tracing::info!(username = %form.username, confirmation_required, "user registered");

        if !confirmation_required {
            return Ok(Redirect::to(&self.location).into_response());
        }
        let base_url = utils::base_url(headers);
        if let Err(e) = self.send_email_confirmation(&base_url, &form.username, &form.email).await {
            tracing::error!(error = %e, email = %form.email, "failed to send confirmation email");
        }
        let vars = [("title", self.title.as_str()), ("username", form.username.as_str()), ("email", form.email.as_str())];
        Ok(html(StatusCode::OK, render_template(self.sent_template.as_deref(), SENT_TEMPLATE, &vars, &[]).await?))
    }

    /// `GET|POST path`.
    pub fn router(self, path: &str) -> Router {
        Router::new().route(path, get(on_get::<U>).post(on_post::<U>)).with_state(Arc::new(self))
    }
}

async fn on_get<U: ConfirmationModel>(State(endpoint): State<Arc<RegisterEndpoint<U>>>) -> Result<Response, AppError> {
    endpoint.on_get().await
}

async fn on_post<U: ConfirmationModel>(
    State(endpoint): State<Arc<RegisterEndpoint<U>>>,
    DbSession(session): DbSession,
    headers: HeaderMap,
    Form(form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    endpoint.on_post(&session, &headers, form).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::User;

    #[test]
    fn links_are_made_absolute() {
        assert_eq!(confirmation_link("http://example.org/", "/confirm", "tok"), "http://example.org/confirm/tok");
        assert_eq!(confirmation_link("http://example.org/", "confirm/", "tok"), "http://example.org/confirm/tok");
        assert_eq!(confirmation_link("http://example.org/", "https://id.example.com/c", "tok"), "https://id.example.com/c/tok");
    }

    #[tokio::test]
    async fn form_renders_values() {
        let endpoint = RegisterEndpoint::<User>::new("secret");
        assert!(!endpoint.email_confirmation_required());
        let page = endpoint.render("alice", "alice@example.org", "oops").await.unwrap();
        assert!(page.contains("value=\"alice@example.org\""));
        assert!(page.contains("oops"));
        assert!(page.contains("action=\"/register\""));
    }
}
