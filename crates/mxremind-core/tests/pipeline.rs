//! Integration tests for the reminder pipeline.
//!
//! These tests run the whole service against an in-memory mailbox, an
//! in-memory `SQLite` store and a recording sink.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use mxremind_core::{
    Components, Config, Envelope, Error, MailError, MailSource, MailboxSession, MemorySink,
    MemorySource, MockClock, OutgoingMessage, Reminder, ReminderStore, Service, SqliteReminderStore,
    StageName, StageState,
};

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// Everything a test needs to seed inputs and inspect outputs.
struct Harness {
    source: MemorySource,
    sink: MemorySink,
    store: Arc<SqliteReminderStore>,
    clock: Arc<MockClock>,
}

impl Harness {
    async fn new() -> Self {
        let source = MemorySource::new();
        source.create_mailbox("INBOX").await;
        source.create_mailbox("Processed").await;
        Self {
            source,
            sink: MemorySink::new(),
            store: Arc::new(SqliteReminderStore::in_memory().await.unwrap()),
            clock: MockClock::shared(noon()),
        }
    }

    fn components(&self, source: Arc<dyn MailSource>) -> Components {
        Components {
            store: self.store.clone(),
            source,
            sink: Arc::new(self.sink.clone()),
            clock: self.clock.clone(),
        }
    }

    fn service(&self) -> Service {
        let source = Arc::new(self.source.clone());
        Service::new(&Config::default(), self.components(source)).unwrap()
    }

    async fn receive(&self, id: &str, subject: &str) {
        self.source
            .deliver("INBOX", Envelope::new(id, "a@x.com", subject))
            .await;
    }
}

#[tokio::test]
async fn test_subject_becomes_stored_reminder() {
    let harness = Harness::new().await;
    harness.receive("<1@x.com>", "tomorrow 09:00 buy milk").await;

    let errors = harness.service().run_once().await.unwrap();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    let stored = harness.store.list(10).await.unwrap();
    assert_eq!(stored.len(), 1);
    let reminder = &stored[0];
    assert_eq!(reminder.recipient, "a@x.com");
    assert_eq!(reminder.content, "buy milk");
    assert_eq!(reminder.due_time, Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap());
    assert_eq!(reminder.generated_from_id.as_deref(), Some("<1@x.com>"));
    assert!(!reminder.is_sent);

    assert!(harness.source.messages("INBOX").await.is_empty());
    assert_eq!(harness.source.messages("Processed").await.len(), 1);
    assert!(harness.sink.sent().await.is_empty());
}

#[tokio::test]
async fn test_plain_subject_reports_one_error() {
    let harness = Harness::new().await;
    harness.receive("<1@x.com>", "not a reminder").await;
    harness.receive("<2@x.com>", "10:30 call bob").await;

    let errors = harness.service().run_once().await.unwrap();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, StageName::Converter);
    assert!(errors[0].source.is_not_a_reminder());
    assert!(errors[0].to_string().starts_with("converter: a@x.com - <1@x.com>"));

    // The pipeline kept going after the bad subject.
    let stored = harness.store.list(10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "call bob");
}

#[tokio::test]
async fn test_due_reminder_is_sent_once() {
    let harness = Harness::new().await;
    let reminder = Reminder::new("a@x.com", "buy milk", noon());
    harness.store.insert(&reminder).await.unwrap();

    assert!(harness.service().run_once().await.unwrap().is_empty());
    assert!(harness.service().run_once().await.unwrap().is_empty());

    assert_eq!(
        harness.sink.sent().await,
        vec![OutgoingMessage::new("a@x.com", "Reminder: buy milk", "")]
    );
    let stored = harness.store.load(reminder.id).await.unwrap().unwrap();
    assert!(stored.is_sent);
}

#[tokio::test]
async fn test_due_boundary() {
    let harness = Harness::new().await;
    let reminder = Reminder::new("a@x.com", "x", noon());
    harness.store.insert(&reminder).await.unwrap();

    harness.clock.set(noon() - chrono::Duration::seconds(1));
    harness.service().run_once().await.unwrap();
    assert!(harness.sink.sent().await.is_empty());

    harness.clock.set(noon());
    harness.service().run_once().await.unwrap();
    assert_eq!(harness.sink.sent().await.len(), 1);
}

#[tokio::test]
async fn test_failed_dispatch_is_reported_and_not_retried() {
    let harness = Harness::new().await;
    let reminder = Reminder::new("a@x.com", "x", noon());
    harness.store.insert(&reminder).await.unwrap();
    harness.sink.set_failing(true);

    let errors = harness.service().run_once().await.unwrap();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, StageName::Sender);
    assert!(matches!(
        &errors[0].source,
        Error::Dispatch { id, source: MailError::Send(_), .. } if *id == reminder.id
    ));

    harness.sink.set_failing(false);
    assert!(harness.service().run_once().await.unwrap().is_empty());
    assert!(harness.sink.sent().await.is_empty());
}

#[tokio::test]
async fn test_relocation_failure_is_reported() {
    let harness = Harness::new().await;
    let source = MemorySource::new();
    source
        .deliver("INBOX", Envelope::new("<1@x.com>", "a@x.com", "10:30 x"))
        .await;

    let service = Service::new(
        &Config::default(),
        harness.components(Arc::new(source.clone())),
    )
    .unwrap();
    let errors = service.run_once().await.unwrap();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, StageName::Fetcher);
    assert!(matches!(errors[0].source, Error::Mail(MailError::Operation(_))));
    // The emitted mail still became a reminder.
    assert_eq!(harness.store.list(10).await.unwrap().len(), 1);
    assert_eq!(source.messages("INBOX").await.len(), 1);
}

#[tokio::test]
async fn test_start_then_stop_closes_every_stage() {
    let harness = Harness::new().await;
    let mut service = harness.service();
    let mut errors = service.errors().unwrap();

    service.start().unwrap();
    service.stop().await;

    assert!(
        service
            .stage_states()
            .iter()
            .all(|(_, state)| *state == StageState::Closed)
    );
    assert!(errors.recv().await.is_none());
    assert_eq!(harness.source.connect_count(), 0);
}

/// Source whose `connect` blocks until released.
struct GatedSource {
    inner: MemorySource,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl MailSource for GatedSource {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.connect().await
    }
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_tick() {
    let harness = Harness::new().await;
    harness.receive("<1@x.com>", "tomorrow 09:00 buy milk").await;

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let source = GatedSource {
        inner: harness.source.clone(),
        entered: entered.clone(),
        release: release.clone(),
    };
    let config = Config {
        fetch_interval: 1,
        send_interval: 1,
        ..Config::default()
    };
    let mut service = Service::new(&config, harness.components(Arc::new(source))).unwrap();
    let mut errors = service.errors().unwrap();
    service.start().unwrap();

    // First tick is in flight, blocked in connect.
    entered.notified().await;
    let stopping = tokio::spawn(async move {
        service.stop().await;
        service
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopping.is_finished());

    release.notify_one();
    let service = stopping.await.unwrap();

    // The tick completed and its output went all the way through.
    let stored = harness.store.list(10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "buy milk");
    assert_eq!(harness.source.messages("Processed").await.len(), 1);

    // No tick was scheduled after cancellation.
    assert_eq!(harness.source.connect_count(), 1);
    assert!(
        service
            .stage_states()
            .iter()
            .all(|(_, state)| *state == StageState::Closed)
    );
    assert!(errors.recv().await.is_none());
}
