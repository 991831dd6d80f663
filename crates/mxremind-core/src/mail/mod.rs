//! Mail source and sink capabilities.
//!
//! The pipeline only talks to [`MailSource`] and [`MailSink`]. Network
//! implementations live in [`imap`] and [`smtp`]; [`memory`] provides
//! in-memory and print-only stand-ins.

pub mod imap;
pub mod memory;
pub mod smtp;

use async_trait::async_trait;
use chrono_tz::Tz;

pub use self::imap::ImapSource;
pub use memory::{ConsoleSink, MemorySink, MemorySource};
pub use smtp::SmtpSink;

/// Errors that can occur during mail operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A mailbox operation failed.
    #[error("Operation failed: {0}")]
    Operation(String),

    /// Invalid address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Send failed.
    #[error("Send failed: {0}")]
    Send(String),
}

/// One fetched message, ready for conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    /// Source-assigned Message-ID.
    pub message_id: String,
    /// Sender address.
    pub from: String,
    /// Decoded subject line.
    pub subject: String,
    /// Reference timezone for resolving the subject.
    pub timezone: Tz,
}

/// Envelope metadata of a message in a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message-ID header, empty if absent.
    pub message_id: String,
    /// First sender address, if any.
    pub from: Option<String>,
    /// Decoded subject line.
    pub subject: String,
}

impl Envelope {
    /// Creates an envelope with a sender.
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            from: Some(from.into()),
            subject: subject.into(),
        }
    }
}

/// Inclusive range of message sequence numbers (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRange {
    /// First sequence number.
    pub first: u32,
    /// Last sequence number.
    pub last: u32,
}

impl SeqRange {
    /// Range covering the newest `n` of `total` messages.
    ///
    /// Returns `None` if the mailbox is empty or `n` is zero.
    #[must_use]
    pub const fn last_n(n: u32, total: u32) -> Option<Self> {
        if n == 0 || total == 0 {
            return None;
        }
        let first = if total >= n { total - n + 1 } else { 1 };
        Some(Self { first, last: total })
    }

    /// Number of messages in the range, at least one.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.last - self.first + 1
    }
}

impl std::fmt::Display for SeqRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.first, self.last)
    }
}

/// A reminder email to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
}

impl OutgoingMessage {
    /// Creates a new outgoing message.
    #[must_use]
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Something that can open sessions on a mail store.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Connects and authenticates a new session.
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailError>;
}

/// An open session against a mail store.
#[async_trait]
pub trait MailboxSession: Send {
    /// Selects a mailbox and returns its message count.
    async fn select_mailbox(&mut self, name: &str) -> Result<u32, MailError>;

    /// Fetches envelope metadata for a range of the selected mailbox.
    async fn fetch_envelopes(&mut self, range: SeqRange) -> Result<Vec<Envelope>, MailError>;

    /// Moves a range of the selected mailbox to `destination`.
    async fn relocate(&mut self, range: SeqRange, destination: &str) -> Result<(), MailError>;

    /// Lists the names of all mailboxes.
    async fn list_mailboxes(&mut self) -> Result<Vec<String>, MailError>;

    /// Ends the session. Further calls fail.
    async fn logout(&mut self) -> Result<(), MailError>;
}

/// Something that can deliver outgoing mail.
#[async_trait]
pub trait MailSink: Send + Sync {
    /// Sends one message.
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), MailError>;
}

/// Fetches the newest `count` envelopes of `mailbox`, then moves them to
/// `move_to` if given.
///
/// An empty mailbox or a zero `count` yields no envelopes and moves nothing.
///
/// # Errors
///
/// Returns the first failing session operation.
pub async fn fetch_latest(
    session: &mut dyn MailboxSession,
    mailbox: &str,
    count: u32,
    move_to: Option<&str>,
) -> Result<Vec<Envelope>, MailError> {
    let total = session.select_mailbox(mailbox).await?;
    let Some(range) = SeqRange::last_n(count, total) else {
        return Ok(Vec::new());
    };
    let envelopes = session.fetch_envelopes(range).await?;
    if let Some(destination) = move_to {
        session.relocate(range, destination).await?;
    }
    Ok(envelopes)
}
