//! In-memory and print-only mail adapters.
//!
//! [`MemorySource`] and [`MemorySink`] keep everything in shared state so
//! tests can seed mailboxes and inspect what was sent. [`ConsoleSink`]
//! prints messages instead of delivering them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Envelope, MailError, MailSink, MailSource, MailboxSession, OutgoingMessage, SeqRange};

#[derive(Debug, Default)]
struct Mailboxes {
    boxes: BTreeMap<String, Vec<Envelope>>,
}

/// Mail source holding its mailboxes in memory.
///
/// Clones share the same mailboxes.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    mailboxes: Arc<Mutex<Mailboxes>>,
    offline: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

impl MemorySource {
    /// Creates a source with no mailboxes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty mailbox if it doesn't exist.
    pub async fn create_mailbox(&self, name: &str) {
        self.mailboxes
            .lock()
            .await
            .boxes
            .entry(name.to_string())
            .or_default();
    }

    /// Appends a message to a mailbox, creating the mailbox if needed.
    pub async fn deliver(&self, mailbox: &str, envelope: Envelope) {
        self.mailboxes
            .lock()
            .await
            .boxes
            .entry(mailbox.to_string())
            .or_default()
            .push(envelope);
    }

    /// Returns the messages currently in a mailbox.
    pub async fn messages(&self, mailbox: &str) -> Vec<Envelope> {
        self.mailboxes
            .lock()
            .await
            .boxes
            .get(mailbox)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes subsequent connections fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailSource for MemorySource {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MailError::Connection("source is offline".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            mailboxes: Arc::clone(&self.mailboxes),
            selected: None,
            closed: false,
        }))
    }
}

struct MemorySession {
    mailboxes: Arc<Mutex<Mailboxes>>,
    selected: Option<String>,
    closed: bool,
}

impl MemorySession {
    fn check_open(&self) -> Result<(), MailError> {
        if self.closed {
            return Err(MailError::Operation("session is closed".into()));
        }
        Ok(())
    }

    fn selected(&self) -> Result<&str, MailError> {
        self.check_open()?;
        self.selected
            .as_deref()
            .ok_or_else(|| MailError::Operation("no mailbox selected".into()))
    }
}

/// Zero-based indices of a range within a mailbox of `len` messages.
fn indices(range: SeqRange, len: usize) -> Result<std::ops::Range<usize>, MailError> {
    let first = range.first as usize;
    let last = range.last as usize;
    if first == 0 || first > last || last > len {
        return Err(MailError::Operation(format!(
            "invalid sequence range {range} for {len} messages"
        )));
    }
    Ok(first - 1..last)
}

#[async_trait]
impl MailboxSession for MemorySession {
    async fn select_mailbox(&mut self, name: &str) -> Result<u32, MailError> {
        self.check_open()?;
        let mailboxes = self.mailboxes.lock().await;
        let messages = mailboxes
            .boxes
            .get(name)
            .ok_or_else(|| MailError::Operation(format!("no mailbox {name:?}")))?;
        let count = u32::try_from(messages.len())
            .map_err(|_| MailError::Operation(format!("mailbox {name:?} is too large")))?;
        drop(mailboxes);
        self.selected = Some(name.to_string());
        Ok(count)
    }

    async fn fetch_envelopes(&mut self, range: SeqRange) -> Result<Vec<Envelope>, MailError> {
        let selected = self.selected()?;
        let mailboxes = self.mailboxes.lock().await;
        let messages = mailboxes.boxes.get(selected).map_or(&[][..], Vec::as_slice);
        let span = indices(range, messages.len())?;
        Ok(messages[span].to_vec())
    }

    async fn relocate(&mut self, range: SeqRange, destination: &str) -> Result<(), MailError> {
        let selected = self.selected()?.to_string();
        let mut mailboxes = self.mailboxes.lock().await;
        if !mailboxes.boxes.contains_key(destination) {
            return Err(MailError::Operation(format!(
                "no mailbox {destination:?}"
            )));
        }
        let moved: Vec<Envelope> = match mailboxes.boxes.get_mut(&selected) {
            Some(messages) => {
                let span = indices(range, messages.len())?;
                messages.drain(span).collect()
            }
            None => return Err(MailError::Operation(format!("no mailbox {selected:?}"))),
        };
        mailboxes
            .boxes
            .entry(destination.to_string())
            .or_default()
            .extend(moved);
        Ok(())
    }

    async fn list_mailboxes(&mut self) -> Result<Vec<String>, MailError> {
        self.check_open()?;
        Ok(self.mailboxes.lock().await.boxes.keys().cloned().collect())
    }

    async fn logout(&mut self) -> Result<(), MailError> {
        self.closed = true;
        self.selected = None;
        Ok(())
    }
}

/// Mail sink that records every message it is given.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent sends fail without recording.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages sent so far, in order.
    pub async fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MailSink for MemorySink {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Send(format!("refusing mail to {}", message.to)));
        }
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

/// Mail sink that prints messages to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

#[async_trait]
impl MailSink for ConsoleSink {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), MailError> {
        println!("To: {}", message.to);
        println!("Subject: {}", message.subject);
        if !message.body.is_empty() {
            println!();
            println!("{}", message.body);
        }
        println!();
        Ok(())
    }
}
