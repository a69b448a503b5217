//! Landing page for mailed confirmation links.

use std::{marker::PhantomData, sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use crate::{
    crud,
    error::AppError,
    models::{
        session::{DbSession, Session},
        users::{self, ConfirmationModel},
    },
    settings::Settings,
    signing::TimedSerializer,
    tz,
};

use super::{html, render_template};

const FAILED_TEMPLATE: &str = include_str!("templates/failed_email_confirmation.html");

pub struct ConfirmEndpoint<U> {
    serializer: TimedSerializer,
    max_age: Option<Duration>,
    location: String,
    title: String,
    template: Option<String>,
    _user: PhantomData<fn() -> U>,
}

impl<U: ConfirmationModel> ConfirmEndpoint<U> {
    /// `secret` must match the one registration signs with.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            serializer: TimedSerializer::new(secret),
            max_age: None,
            location: "/login".into(),
            title: "APIToolbox".into(),
            template: None,
            _user: PhantomData,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let endpoint = Self::new(settings.jwt.secret.as_bytes());
        match settings.registration.confirm_max_age {
            Some(secs) => endpoint.max_age(Duration::from_secs(secs)),
            None => endpoint,
        }
    }

    pub fn serializer(mut self, serializer: TimedSerializer) -> Self { self.serializer = serializer; self }
    pub fn max_age(mut self, max_age: Duration) -> Self { self.max_age = Some(max_age); self }
    pub fn location(mut self, location: impl Into<String>) -> Self { self.location = location.into(); self }
    pub fn template(mut self, template: impl Into<String>) -> Self { self.template = Some(template.into()); self }

    async fn failed(&self, error: &str, email: &str) -> Result<Response, AppError> {
        let vars = [("title", self.title.as_str()), ("error", error), ("email", email)];
        Ok(html(StatusCode::BAD_REQUEST, render_template(self.template.as_deref(), FAILED_TEMPLATE, &vars, &[]).await?))
    }

    /// Tokens older than the configured max age are rejected.
    pub async fn on_get(&self, session: &Session, token: &str) -> Result<Response, AppError> {
        let email: String = match self.serializer.loads(token, self.max_age) {
            Ok(email) => email,
            Err(e) => {
                tracing::info!(error = %e, "rejected confirmation token");
                return self.failed("The confirmation link is invalid or expired.", "").await;
            }
        };
        let Some(mut user) = users::get_by_email::<U>(session, &email).await? else {
            return self.failed(&format!("User not found: {email}"), &email).await;
        };
        if user.confirmed() {
            tracing::info!(email, "email already confirmed");
        } else {
            user.set_confirmed_at(Some(tz::utcnow()));
            crud::save(session, &mut user).await?;
            session.commit().await?;
            tracing::info!(email, "email confirmed");
        }
        let location = HeaderValue::from_str(&self.location).map_err(|e| AppError::Validation(format!("invalid location: {e}")))?;
        Ok((StatusCode::SEE_OTHER, [(header::LOCATION, location)], Json(user.as_dict()?)).into_response())
    }

    /// `GET path/:token`.
    pub fn router(self, path: &str) -> Router {
        let route = format!("{}/:token", path.trim_end_matches('/'));
        Router::new().route(&route, get(on_get::<U>)).with_state(Arc::new(self))
    }
}

async fn on_get<U: ConfirmationModel>(
    State(endpoint): State<Arc<ConfirmEndpoint<U>>>,
    DbSession(session): DbSession,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    endpoint.on_get(&session, &token).await
}
