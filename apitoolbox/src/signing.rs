//! URL-safe, timestamped and signed tokens, used for email confirmation links.
//!
//! Format: `b64(json payload) . b64(unix timestamp) . b64(hmac)`, unpadded
//! URL-safe base64. The HMAC-SHA256 covers the salt, payload and timestamp.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SALT: &str = "apitoolbox-confirmation";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("bad data: {0}")]
    BadData(String),
    #[error("signature does not match")]
    BadSignature,
    #[error("signature age {age}s > {max_age}s")]
    Expired { age: i64, max_age: u64 },
}

impl From<SignatureError> for AppError {
    fn from(e: SignatureError) -> Self { AppError::Signing(e.to_string()) }
}

#[derive(Clone)]
pub struct TimedSerializer {
    secret: Vec<u8>,
    salt: String,
}

impl TimedSerializer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self { secret: secret.as_ref().to_vec(), salt: DEFAULT_SALT.to_string() }
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    fn mac(&self, payload: &str, timestamp: &str) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| SignatureError::BadData(e.to_string()))?;
        mac.update(self.salt.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        Ok(mac)
    }

    pub fn dumps<T: Serialize>(&self, value: &T) -> Result<String, SignatureError> {
        self.dumps_at(value, chrono::Utc::now().timestamp())
    }

    /// Sign `value` as if at unix time `timestamp`.
    pub fn dumps_at<T: Serialize>(&self, value: &T, timestamp: i64) -> Result<String, SignatureError> {
        let json = serde_json::to_vec(value).map_err(|e| SignatureError::BadData(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let timestamp = URL_SAFE_NO_PAD.encode(timestamp.to_string());
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&payload, &timestamp)?.finalize().into_bytes());
        Ok(format!("{payload}.{timestamp}.{signature}"))
    }

    /// Verify and decode `token`. With `max_age`, older tokens are rejected.
    pub fn loads<T: DeserializeOwned>(&self, token: &str, max_age: Option<Duration>) -> Result<T, SignatureError> {
        let mut parts = token.split('.');
        let (Some(payload), Some(timestamp), Some(signature), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SignatureError::BadSignature);
        };
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| SignatureError::BadSignature)?;
        self.mac(payload, timestamp)?.verify_slice(&signature).map_err(|_| SignatureError::BadSignature)?;

        let decode = |part: &str| URL_SAFE_NO_PAD.decode(part).map_err(|e| SignatureError::BadData(e.to_string()));
        let signed_at: i64 = String::from_utf8(decode(timestamp)?)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SignatureError::BadData("invalid timestamp".into()))?;
        if let Some(max_age) = max_age {
            let age = chrono::Utc::now().timestamp() - signed_at;
            if age > max_age.as_secs() as i64 {
                return Err(SignatureError::Expired { age, max_age: max_age.as_secs() });
            }
        }
        serde_json::from_slice(&decode(payload)?).map_err(|e| SignatureError::BadData(e.to_string()))
    }
}
