//! Reminder saver: persists new reminders.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{Consume, Flow, Reporter, StageName, StageState, StreamStage};
use crate::Error;
use crate::reminder::{Reminder, ReminderStore};

/// Stream stage that inserts each [`Reminder`] into the store.
///
/// A failed insert is reported and the reminder dropped; there is no retry.
pub struct ReminderSaver {
    stage: StreamStage<Save>,
}

struct Save {
    store: Arc<dyn ReminderStore>,
    reporter: Reporter,
}

impl ReminderSaver {
    /// Creates the saver reading from `input`, with its error output.
    #[must_use]
    pub fn new(
        input: mpsc::Receiver<Reminder>,
        store: Arc<dyn ReminderStore>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Error>) {
        let (reporter, errors) = Reporter::channel(StageName::Saver, capacity);
        let stage = StreamStage::new(StageName::Saver, input, Save { store, reporter });
        (Self { stage }, errors)
    }

    /// Watches the saver's lifecycle.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StageState> {
        self.stage.subscribe()
    }

    /// Saves one reminder. Returns [`Flow::Stop`] once the input is
    /// exhausted.
    pub async fn step(&mut self) -> Flow {
        self.stage.step().await
    }

    /// Saves until the input closes, then closes its error output.
    pub async fn run(self) {
        self.stage.run().await;
    }
}

#[async_trait]
impl Consume for Save {
    type Item = Reminder;

    async fn consume(&mut self, reminder: Reminder) -> Flow {
        match self.store.insert(&reminder).await {
            Ok(()) => debug!("Saved reminder {} for {}", reminder.id, reminder.recipient),
            Err(e) => self.reporter.report(e).await,
        }
        Flow::Continue
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::reminder::SqliteReminderStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_saves_reminders() {
        let store = Arc::new(SqliteReminderStore::in_memory().await.unwrap());
        let (tx, rx) = mpsc::channel(4);
        let (saver, mut errors) = ReminderSaver::new(rx, store.clone(), 4);

        let reminder = Reminder::new("a@x.com", "x", Utc::now());
        tx.send(reminder.clone()).await.unwrap();
        drop(tx);
        saver.run().await;

        assert!(errors.recv().await.is_none());
        assert_eq!(store.load(reminder.id).await.unwrap(), Some(reminder));
    }

    #[tokio::test]
    async fn test_failed_insert_is_reported_and_saver_continues() {
        let store = Arc::new(SqliteReminderStore::in_memory().await.unwrap());
        let (tx, rx) = mpsc::channel(4);
        let (mut saver, mut errors) = ReminderSaver::new(rx, store.clone(), 4);

        let duplicate = Reminder::new("a@x.com", "x", Utc::now());
        let other = Reminder::new("b@x.com", "y", Utc::now());
        for reminder in [&duplicate, &duplicate, &other] {
            tx.send(reminder.clone()).await.unwrap();
        }

        for _ in 0..3 {
            assert_eq!(saver.step().await, Flow::Continue);
        }

        assert!(matches!(errors.recv().await, Some(Error::Database(_))));
        assert!(store.load(other.id).await.unwrap().is_some());
    }
}
