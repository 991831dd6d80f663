//! Due reminder querier: selects due reminders and marks them sent.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Flow, Reporter, StageName, StageState, Tick, TimerStage, capacity};
use crate::Error;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::reminder::{Reminder, ReminderStore};

/// Timer stage that emits every reminder whose due time has passed.
///
/// Each reminder is marked sent and committed before it is emitted, so a
/// reminder is handed to the sender at most once. A crash between the
/// commit and the dispatch loses that notification.
pub struct DueReminderQuerier {
    stage: TimerStage<Query>,
}

struct Query {
    store: Arc<dyn ReminderStore>,
    clock: SharedClock,
    output: mpsc::Sender<Reminder>,
    reporter: Reporter,
}

impl DueReminderQuerier {
    /// Creates the querier with its due-reminder and error outputs.
    #[must_use]
    pub fn new(
        store: Arc<dyn ReminderStore>,
        clock: SharedClock,
        config: &Config,
    ) -> (Self, mpsc::Receiver<Reminder>, mpsc::Receiver<Error>) {
        let capacity = capacity(config.max_messages);
        let (output, due) = mpsc::channel(capacity);
        let (reporter, errors) = Reporter::channel(StageName::Querier, capacity);
        let work = Query {
            store,
            clock,
            output,
            reporter,
        };
        let stage = TimerStage::new(StageName::Querier, config.send_period(), work);
        (Self { stage }, due, errors)
    }

    /// Watches the querier's lifecycle.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StageState> {
        self.stage.subscribe()
    }

    /// Queries every period until `cancel` fires, then closes its outputs.
    pub async fn run(self, cancel: CancellationToken) {
        self.stage.run(cancel).await;
    }

    /// Queries once, then closes its outputs.
    pub async fn run_once(self) {
        self.stage.run_once().await;
    }
}

#[async_trait]
impl Tick for Query {
    async fn tick(&mut self) -> Flow {
        let now = self.clock.now();
        let due = match self.store.select_due(now).await {
            Ok(due) => due,
            Err(e) => {
                self.reporter.report(e).await;
                return Flow::Continue;
            }
        };
        info!("Found {} reminders due", due.len());

        for mut reminder in due {
            reminder.mark_sent();
            if let Err(e) = self.store.update(&reminder).await {
                self.reporter.report(e).await;
                continue;
            }
            debug!("Reminder {} marked sent", reminder.id);
            if self.output.send(reminder).await.is_err() {
                warn!("Due reminder output closed, stopping querier");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::reminder::{ReminderId, SqliteReminderStore};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
    }

    async fn store_with(reminders: &[&Reminder]) -> Arc<SqliteReminderStore> {
        let store = Arc::new(SqliteReminderStore::in_memory().await.unwrap());
        for reminder in reminders {
            store.insert(reminder).await.unwrap();
        }
        store
    }

    async fn tick_at(store: Arc<SqliteReminderStore>, now: DateTime<Utc>) -> Vec<Reminder> {
        let (querier, mut rx, _errors) =
            DueReminderQuerier::new(store, MockClock::shared(now), &Config::default());
        querier.run_once().await;

        let mut emitted = Vec::new();
        while let Some(reminder) = rx.recv().await {
            emitted.push(reminder);
        }
        emitted
    }

    #[tokio::test]
    async fn test_due_boundary() {
        let reminder = Reminder::new("a@x.com", "x", due());
        let store = store_with(&[&reminder]).await;

        assert!(tick_at(store.clone(), due() - Duration::seconds(1)).await.is_empty());

        let emitted = tick_at(store.clone(), due()).await;
        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].is_sent);
        assert!(store.load(reminder.id).await.unwrap().unwrap().is_sent);
    }

    #[tokio::test]
    async fn test_second_tick_emits_nothing() {
        let reminder = Reminder::new("a@x.com", "x", due());
        let store = store_with(&[&reminder]).await;
        let later = due() + Duration::hours(1);

        assert_eq!(tick_at(store.clone(), later).await.len(), 1);
        assert!(tick_at(store.clone(), later).await.is_empty());
        assert!(store.load(reminder.id).await.unwrap().unwrap().is_sent);
    }

    /// Store whose updates fail for one id.
    struct FlakyStore {
        inner: SqliteReminderStore,
        broken: ReminderId,
    }

    #[async_trait]
    impl ReminderStore for FlakyStore {
        async fn insert(&self, reminder: &Reminder) -> crate::Result<()> {
            self.inner.insert(reminder).await
        }

        async fn update(&self, reminder: &Reminder) -> crate::Result<()> {
            if reminder.id == self.broken {
                return Err(Error::ReminderNotFound(reminder.id));
            }
            self.inner.update(reminder).await
        }

        async fn select_due(&self, as_of: DateTime<Utc>) -> crate::Result<Vec<Reminder>> {
            self.inner.select_due(as_of).await
        }

        async fn load(&self, id: ReminderId) -> crate::Result<Option<Reminder>> {
            self.inner.load(id).await
        }

        async fn list(&self, limit: u32) -> crate::Result<Vec<Reminder>> {
            self.inner.list(limit).await
        }
    }

    #[tokio::test]
    async fn test_failed_update_is_reported_and_tick_continues() {
        let broken = Reminder::new("a@x.com", "broken", due());
        let fine = Reminder::new("b@x.com", "fine", due() + Duration::minutes(1));
        let inner = SqliteReminderStore::in_memory().await.unwrap();
        inner.insert(&broken).await.unwrap();
        inner.insert(&fine).await.unwrap();
        let store = Arc::new(FlakyStore {
            inner,
            broken: broken.id,
        });

        let now = due() + Duration::hours(1);
        let (querier, mut rx, mut errors) =
            DueReminderQuerier::new(store, MockClock::shared(now), &Config::default());
        querier.run_once().await;

        assert_eq!(rx.recv().await.map(|r| r.id), Some(fine.id));
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            errors.recv().await,
            Some(Error::ReminderNotFound(id)) if id == broken.id
        ));
    }
}
