//! IMAP mail source.
//!
//! Wraps the blocking `imap` client; every command runs on the blocking
//! thread pool so sessions can be driven from async stages.

use ::imap::{ClientBuilder, ConnectionMode, TlsKind};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Envelope, MailError, MailSource, MailboxSession, SeqRange};
use crate::config::{Security, ServerConfig};

type Session = ::imap::Session<::imap::Connection>;

/// Mail source backed by an IMAP server.
#[derive(Debug, Clone)]
pub struct ImapSource {
    config: ServerConfig,
}

impl ImapSource {
    /// Creates a source for the given server.
    #[must_use]
    pub const fn new(config: ServerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailSource for ImapSource {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailError> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || login(&config))
            .await
            .map_err(|e| MailError::Connection(e.to_string()))??;
        debug!(
            "IMAP session open for {} on {} ({})",
            self.config.address,
            self.config.host,
            self.config.security.display_name()
        );
        Ok(Box::new(ImapSession {
            session: Some(session),
        }))
    }
}

fn login(config: &ServerConfig) -> Result<Session, MailError> {
    let mode = match config.security {
        Security::Tls => ConnectionMode::Tls,
        Security::StartTls => ConnectionMode::StartTls,
        Security::None => ConnectionMode::Plaintext,
    };
    let client = ClientBuilder::new(config.host.as_str(), config.imap_port())
        .mode(mode)
        .tls_kind(TlsKind::Any)
        .danger_skip_tls_verify(config.insecure)
        .connect()
        .map_err(|e| MailError::Connection(e.to_string()))?;
    client
        .login(&config.address, &config.password)
        .map_err(|(e, _client)| MailError::Authentication(e.to_string()))
}

/// An authenticated IMAP session.
struct ImapSession {
    session: Option<Session>,
}

impl ImapSession {
    /// Runs `op` against the session on the blocking pool.
    async fn run<T, F>(&mut self, op: F) -> Result<T, MailError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> ::imap::Result<T> + Send + 'static,
    {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| MailError::Operation("session is closed".into()))?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| MailError::Operation(e.to_string()))?;
        self.session = Some(session);
        result.map_err(|e| MailError::Operation(e.to_string()))
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn select_mailbox(&mut self, name: &str) -> Result<u32, MailError> {
        let name = name.to_string();
        self.run(move |s| s.select(&name).map(|mailbox| mailbox.exists))
            .await
    }

    async fn fetch_envelopes(&mut self, range: SeqRange) -> Result<Vec<Envelope>, MailError> {
        self.run(move |s| {
            let fetches = s.fetch(range.to_string(), "ENVELOPE")?;
            let envelopes: Vec<Envelope> = fetches
                .iter()
                .filter_map(|fetch| fetch.envelope())
                .map(|envelope| Envelope {
                    message_id: envelope
                        .message_id
                        .as_deref()
                        .map(|raw| String::from_utf8_lossy(raw).into_owned())
                        .unwrap_or_default(),
                    from: envelope.from.as_ref().and_then(|addresses| {
                        addresses.first().and_then(|address| {
                            format_address(address.mailbox.as_deref(), address.host.as_deref())
                        })
                    }),
                    subject: envelope
                        .subject
                        .as_deref()
                        .map(decode_subject)
                        .unwrap_or_default(),
                })
                .collect();
            Ok(envelopes)
        })
        .await
    }

    async fn relocate(&mut self, range: SeqRange, destination: &str) -> Result<(), MailError> {
        let destination = destination.to_string();
        self.run(move |s| {
            let sequence = range.to_string();
            if s.capabilities()?.has_str("MOVE") {
                s.mv(&sequence, &destination)
            } else {
                s.copy(&sequence, &destination)?;
                s.store(&sequence, "+FLAGS.SILENT (\\Deleted)")?;
                s.expunge().map(|_| ())
            }
        })
        .await
    }

    async fn list_mailboxes(&mut self) -> Result<Vec<String>, MailError> {
        self.run(|s| {
            let names = s.list(None, Some("*"))?;
            let names: Vec<String> = names.iter().map(|name| name.name().to_string()).collect();
            Ok(names)
        })
        .await
    }

    async fn logout(&mut self) -> Result<(), MailError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || session.logout())
            .await
            .map_err(|e| MailError::Operation(e.to_string()))?
            .map_err(|e| MailError::Operation(e.to_string()))
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("IMAP session dropped without logout");
        }
    }
}

fn format_address(mailbox: Option<&[u8]>, host: Option<&[u8]>) -> Option<String> {
    let mailbox = String::from_utf8_lossy(mailbox?);
    match host.map(String::from_utf8_lossy) {
        Some(host) if !host.is_empty() => Some(format!("{mailbox}@{host}")),
        _ => Some(mailbox.into_owned()),
    }
}

/// Decodes RFC 2047 encoded-words in a raw subject.
fn decode_subject(raw: &[u8]) -> String {
    let mut line = b"Subject: ".to_vec();
    line.extend_from_slice(raw);
    mailparse::parse_header(&line).map_or_else(
        |_| String::from_utf8_lossy(raw).into_owned(),
        |(header, _)| header.get_value(),
    )
}
