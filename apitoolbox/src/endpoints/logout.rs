//! Logout: drop the JWT cookie and send the browser back to the login page.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct LogoutEndpoint {
    cookie_name: String,
    location: String,
}

impl Default for LogoutEndpoint {
    fn default() -> Self { Self { cookie_name: "jwt".into(), location: "/login".into() } }
}

impl LogoutEndpoint {
    pub fn new() -> Self { Self::default() }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self { self.cookie_name = name.into(); self }

    pub fn location(mut self, location: impl Into<String>) -> Self { self.location = location.into(); self }

    pub fn on_post(&self) -> Result<Response, AppError> {
        let cookie = format!(
            "{}=\"\"; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; Path=/; SameSite=lax",
            self.cookie_name
        );
        let cookie = HeaderValue::from_str(&cookie).map_err(|e| AppError::Unknown(e.to_string()))?;
        let location = HeaderValue::from_str(&self.location).map_err(|e| AppError::Validation(format!("invalid location: {e}")))?;
        Ok((StatusCode::SEE_OTHER, [(header::LOCATION, location), (header::SET_COOKIE, cookie)]).into_response())
    }

    /// `POST path`.
    pub fn router(self, path: &str) -> Router {
        Router::new().route(path, post(on_post)).with_state(Arc::new(self))
    }
}

async fn on_post(State(endpoint): State<Arc<LogoutEndpoint>>) -> Result<Response, AppError> { endpoint.on_post() }
