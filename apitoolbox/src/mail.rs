//! Outgoing email.

use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::{error::AppError, settings::EmailSettings};

/// A multipart (plain text + html) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError>;
}

fn mailbox(address: &str) -> Result<Mailbox, AppError> {
    address.parse().map_err(|e| AppError::Mail(format!("invalid address {address:?}: {e}")))
}

impl EmailMessage {
    fn to_message(&self) -> Result<Message, AppError> {
        let mut builder = Message::builder().from(mailbox(&self.from)?).subject(self.subject.clone());
        for to in &self.to {
            builder = builder.to(mailbox(to)?);
        }
        builder
            .multipart(MultiPart::alternative_plain_html(self.text.clone(), self.html.clone()))
            .map_err(|e| AppError::Mail(e.to_string()))
    }
}

/// SMTP delivery: implicit TLS when `ssl`, STARTTLS when `tls`, otherwise plain.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    server: String,
    port: u16,
    ssl: bool,
    tls: bool,
    credentials: Option<(String, String)>,
}

impl SmtpMailer {
    pub fn new(server: impl Into<String>) -> Self {
        Self { server: server.into(), port: 0, ssl: false, tls: false, credentials: None }
    }

    pub fn from_settings(settings: &EmailSettings) -> Self {
        Self {
            server: settings.server.clone(),
            port: settings.port,
            ssl: settings.ssl,
            tls: settings.tls,
            credentials: settings.login.clone().map(|login| (login, settings.password.clone().unwrap_or_default())),
        }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, AppError> {
        let mut builder = if self.ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.server).map_err(|e| AppError::Mail(e.to_string()))?
        } else if self.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.server).map_err(|e| AppError::Mail(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.server)
        };
        if self.port != 0 {
            builder = builder.port(self.port);
        }
        if let Some((login, password)) = &self.credentials {
            builder = builder.credentials(Credentials::new(login.clone(), password.clone()));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        let email = message.to_message()?;
        self.transport()?.send(email).await.map_err(|e| AppError::Mail(e.to_string()))?;
        tracing::info!(to = ?message.to, subject = %message.subject, "email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            subject: "Email confirmation".into(),
            from: "noreply@example.org".into(),
            to: vec!["alice@example.org".into()],
            text: "Confirm".into(),
            html: "<p>Confirm</p>".into(),
        }
    }

    #[test]
    fn message_builds_with_both_parts() {
        let built = message().to_message().unwrap();
        let raw = String::from_utf8(built.formatted()).unwrap();
        assert!(raw.contains("Subject: Email confirmation"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn bad_address_is_a_mail_error() {
        let mut bad = message();
        bad.to = vec!["not an address".into()];
        assert!(matches!(bad.to_message(), Err(AppError::Mail(_))));
    }
}
