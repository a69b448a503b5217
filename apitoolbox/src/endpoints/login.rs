//! Form login issuing a JWT cookie.

use std::{marker::PhantomData, sync::Arc};

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::Algorithm;
use serde::Deserialize;

use crate::{
    error::AppError,
    models::{
        base::Record,
        session::{DbSession, Session},
        users::{self, UserModel},
    },
    settings::Settings,
    tz, utils,
};

use super::{html, render_template};

const LOGIN_TEMPLATE: &str = include_str!("templates/login.html");
const LOGIN_FAILED: &str = "Login failed; Invalid userID or password";

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    /// Where to go after a successful login.
    pub location: Option<String>,
}

/// `Expires` attribute format, e.g. `Wed, 21 Oct 2015 07:28:00 GMT`.
pub(crate) fn http_date(value: &DateTime<Utc>) -> String { value.format("%a, %d %b %Y %H:%M:%S GMT").to_string() }

pub struct LoginEndpoint<U> {
    secret: String,
    algorithm: Algorithm,
    cookie_name: String,
    token_expiry: i64,
    secure_cookie: bool,
    location: String,
    template: Option<String>,
    title: String,
    modal_title: String,
    form_action: String,
    register_url: Option<String>,
    error_status_code: StatusCode,
    require_confirmation: bool,
    _user: PhantomData<fn() -> U>,
}

impl<U: UserModel> LoginEndpoint<U> {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: Algorithm::HS256,
            cookie_name: "jwt".into(),
            token_expiry: 86_400,
            secure_cookie: true,
            location: "/".into(),
            template: None,
            title: "APIToolbox".into(),
            modal_title: "Login".into(),
            form_action: "/login".into(),
            register_url: None,
            error_status_code: StatusCode::UNAUTHORIZED,
            require_confirmation: false,
            _user: PhantomData,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        Ok(Self::new(settings.jwt.secret.clone())
            .algorithm(settings.jwt.algorithm()?)
            .cookie_name(settings.jwt.cookie_name.clone())
            .token_expiry(settings.jwt.token_expiry)
            .secure_cookie(settings.jwt.secure_cookie)
            .require_confirmation(settings.registration.require_confirmation))
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self { self.algorithm = algorithm; self }
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self { self.cookie_name = name.into(); self }
    /// Seconds until the issued token expires.
    pub fn token_expiry(mut self, seconds: i64) -> Self { self.token_expiry = seconds; self }
    pub fn secure_cookie(mut self, secure: bool) -> Self { self.secure_cookie = secure; self }
    pub fn location(mut self, location: impl Into<String>) -> Self { self.location = location.into(); self }
    /// A template file path, or inline text starting with `<`.
    pub fn template(mut self, template: impl Into<String>) -> Self { self.template = Some(template.into()); self }
    pub fn title(mut self, title: impl Into<String>) -> Self { self.title = title.into(); self }
    pub fn modal_title(mut self, title: impl Into<String>) -> Self { self.modal_title = title.into(); self }
    pub fn form_action(mut self, action: impl Into<String>) -> Self { self.form_action = action.into(); self }
    pub fn register_url(mut self, url: impl Into<String>) -> Self { self.register_url = Some(url.into()); self }
    pub fn error_status_code(mut self, status: StatusCode) -> Self { self.error_status_code = status; self }
    pub fn require_confirmation(mut self, required: bool) -> Self { self.require_confirmation = required; self }

    pub async fn render(&self, username: &str, error: &str) -> Result<String, AppError> {
        let register_link = match &self.register_url {
            Some(url) => format!("<a href=\"{}\">Register</a>", utils::escape_html(url)),
            None => String::new(),
        };
        let vars = [
            ("title", self.title.as_str()),
            ("modal_title", self.modal_title.as_str()),
            ("form_action", self.form_action.as_str()),
            ("username", username),
            ("error", error),
        ];
        let markup = [("register_link", register_link.as_str())];
        render_template(self.template.as_deref(), LOGIN_TEMPLATE, &vars, &markup).await
    }

    /// The user behind `username` if `password` matches and, when
    /// required, the account is confirmed.
    pub async fn authenticate(&self, session: &Session, username: &str, password: &str) -> Result<Option<U>, AppError> {
        let Some(user) = users::get_by_username::<U>(session, username).await? else {
            tracing::info!(username, "login for unknown user");
            return Ok(None);
        };
        if !users::verify(&user, password).await? {
            tracing::info!(username, "login with a wrong password");
            return Ok(None);
        }
        if self.require_confirmation && !user.is_confirmed() {
            tracing::info!(username, "login before email confirmation");
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// The user's dictionary with `exp`, signed. Returns the claims and the token.
    pub fn issue_token(&self, user: &U) -> Result<(Record, String, DateTime<Utc>), AppError> {
        let expires = tz::utcnow() + Duration::seconds(self.token_expiry);
        let mut claims = user.as_dict()?;
        claims.insert("exp".into(), expires.timestamp().into());
        let token = utils::jwt_encode(&claims, &self.secret, self.algorithm)?;
        Ok((claims, token, expires))
    }

    fn cookie(&self, token: &str, expires: &DateTime<Utc>) -> String {
        let mut cookie = format!("{}={token}; Expires={}; Path=/; SameSite=lax", self.cookie_name, http_date(expires));
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub async fn on_get(&self) -> Result<Response, AppError> {
        Ok(html(StatusCode::OK, self.render("", "").await?))
    }

    pub async fn on_post(&self, session: &Session, form: LoginForm) -> Result<Response, AppError> {
        let Some(user) = self.authenticate(session, &form.username, &form.password).await? else {
            return Ok(html(self.error_status_code, self.render(&form.username, LOGIN_FAILED).await?));
        };
        let (mut body, token, expires) = self.issue_token(&user)?;
        body.insert("exp".into(), tz::isoformat(&expires).into());
        body.insert("token".into(), token.clone().into());

        let location = form.location.filter(|l| !l.is_empty()).unwrap_or_else(|| self.location.clone());
        let location = HeaderValue::from_str(&location).map_err(|e| AppError::Validation(format!("invalid location: {e}")))?;
        let cookie = HeaderValue::from_str(&self.cookie(&token, &expires)).map_err(|e| AppError::Unknown(e.to_string()))?;
        tracing::info!(username = user.username(), "login");
        Ok((StatusCode::SEE_OTHER, [(header::LOCATION, location), (header::SET_COOKIE, cookie)], Json(body)).into_response())
    }

    /// `GET|POST path`.
    pub fn router(self, path: &str) -> Router {
        Router::new().route(path, get(on_get::<U>).post(on_post::<U>)).with_state(Arc::new(self))
    }
}

async fn on_get<U: UserModel>(State(endpoint): State<Arc<LoginEndpoint<U>>>) -> Result<Response, AppError> {
    endpoint.on_get().await
}

async fn on_post<U: UserModel>(
    State(endpoint): State<Arc<LoginEndpoint<U>>>,
    DbSession(session): DbSession,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    endpoint.on_post(&session, form).await
}
