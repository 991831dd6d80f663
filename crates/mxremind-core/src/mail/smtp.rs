//! SMTP mail sink.
//!
//! Every message is sent over a fresh connection, so a broken connection
//! never outlives a single reminder.

use async_trait::async_trait;
use lettre::message::{Mailbox, Message, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::debug;

use super::{MailError, MailSink, OutgoingMessage};
use crate::config::{Security, ServerConfig};

/// Mail sink backed by an SMTP server.
#[derive(Debug, Clone)]
pub struct SmtpSink {
    config: ServerConfig,
}

impl SmtpSink {
    /// Creates a sink for the given server; messages are sent from its address.
    #[must_use]
    pub const fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Builds the RFC 5322 message.
    fn build(&self, message: &OutgoingMessage) -> Result<Message, MailError> {
        let from: Mailbox = self
            .config
            .address
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {e}", self.config.address)))?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {e}", message.to)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| MailError::Send(e.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let config = &self.config;
        let params = || {
            TlsParameters::builder(config.host.clone())
                .dangerous_accept_invalid_certs(config.insecure)
                .build()
                .map_err(|e| MailError::Connection(e.to_string()))
        };
        let tls = match config.security {
            Security::Tls => Tls::Wrapper(params()?),
            Security::StartTls => Tls::Required(params()?),
            Security::None => Tls::None,
        };

        let builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.smtp_port())
            .tls(tls);
        let builder = if config.authenticated {
            builder.credentials(Credentials::new(
                config.address.clone(),
                config.password.clone(),
            ))
        } else {
            builder
        };
        Ok(builder.build())
    }
}

#[async_trait]
impl MailSink for SmtpSink {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), MailError> {
        let email = self.build(message)?;
        let mailer = self.transport()?;

        mailer
            .send(email)
            .await
            .map_err(|e| MailError::Send(e.to_string()))?;
        debug!("Sent {:?} to {}", message.subject, message.to);
        Ok(())
    }
}
