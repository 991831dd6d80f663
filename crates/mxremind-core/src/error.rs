//! Error types for the core library.

use thiserror::Error;

use crate::mail::MailError;
use crate::reminder::{NotAReminderSpec, ReminderId};

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Mail source or sink operation failed.
    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    /// A fetched message subject did not contain a reminder specification.
    #[error("{sender} - {message_id}: not a reminder spec: {source}")]
    NotAReminderSpec {
        /// Sender of the originating message.
        sender: String,
        /// Message-ID of the originating message.
        message_id: String,
        /// Why the subject was rejected.
        source: NotAReminderSpec,
    },

    /// A fetched message has no sender address.
    #[error("message {0:?} has no From")]
    MissingSender(String),

    /// A reminder could not be dispatched through the mail sink.
    #[error("sending reminder {id} to {recipient}: {source}")]
    Dispatch {
        /// Reminder that was already marked sent.
        id: ReminderId,
        /// Intended recipient.
        recipient: String,
        /// Underlying sink failure.
        source: MailError,
    },

    /// No reminder row matches the given id.
    #[error("Reminder not found: {0}")]
    ReminderNotFound(ReminderId),

    /// A stored row could not be decoded into a reminder.
    #[error("Invalid reminder row {id}: {reason}")]
    InvalidRow {
        /// Raw id column of the row.
        id: String,
        /// Decoding failure.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The service stages were already started or consumed.
    #[error("service already started")]
    AlreadyStarted,

    /// The combined error stream was already taken by a consumer.
    #[error("service error stream already taken")]
    ErrorStreamTaken,
}

impl Error {
    /// Returns true for a subject that is simply not a reminder request.
    #[must_use]
    pub const fn is_not_a_reminder(&self) -> bool {
        matches!(self, Self::NotAReminderSpec { .. })
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
