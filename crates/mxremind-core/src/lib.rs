//! # mxremind-core
//!
//! Core logic of the `mxremind` email reminder service.
//!
//! This crate provides:
//! - Reminder model and the subject parser (`tomorrow 09:00 buy milk`)
//! - Reminder storage (`SQLite`)
//! - Mail capabilities with IMAP, SMTP, in-memory and console adapters
//! - The five-stage processing pipeline
//! - The service that wires, starts and stops the pipeline
//! - Configuration types and validation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
mod error;
pub mod mail;
pub mod pipeline;
pub mod reminder;
pub mod service;

pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use config::{Config, ConfigError, DatabaseConfig, MailboxConfig, Security, ServerConfig};
pub use error::{Error, Result};
pub use mail::{
    ConsoleSink, Envelope, ImapSource, Mail, MailError, MailSink, MailSource, MailboxSession,
    MemorySink, MemorySource, OutgoingMessage, SeqRange, SmtpSink, fetch_latest,
};
pub use pipeline::{
    DueReminderQuerier, Flow, MailFetcher, ReminderConverter, ReminderSaver, ReminderSender,
    StageName, StageState,
};
pub use reminder::{
    NotAReminderSpec, Pattern, Reminder, ReminderId, ReminderStore, SqliteReminderStore, TimeSpec,
    parse_spec,
};
pub use service::{Components, Service, ServiceError};
