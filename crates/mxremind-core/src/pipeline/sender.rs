//! Reminder sender: mails due reminders to their recipients.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::info;

use super::{Consume, Flow, Reporter, StageName, StageState, StreamStage};
use crate::Error;
use crate::mail::{MailSink, OutgoingMessage};
use crate::reminder::Reminder;

/// Stream stage that sends one email per due [`Reminder`].
///
/// The subject is `Reminder: <content>` and the body is empty. A failed
/// send is reported as [`Error::Dispatch`]; the reminder stays marked sent.
pub struct ReminderSender {
    stage: StreamStage<Dispatch>,
}

struct Dispatch {
    sink: Arc<dyn MailSink>,
    reporter: Reporter,
}

impl ReminderSender {
    /// Creates the sender reading from `input`, with its error output.
    #[must_use]
    pub fn new(
        input: mpsc::Receiver<Reminder>,
        sink: Arc<dyn MailSink>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Error>) {
        let (reporter, errors) = Reporter::channel(StageName::Sender, capacity);
        let stage = StreamStage::new(StageName::Sender, input, Dispatch { sink, reporter });
        (Self { stage }, errors)
    }

    /// Watches the sender's lifecycle.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StageState> {
        self.stage.subscribe()
    }

    /// Sends one reminder. Returns [`Flow::Stop`] once the input is
    /// exhausted.
    pub async fn step(&mut self) -> Flow {
        self.stage.step().await
    }

    /// Sends until the input closes, then closes its error output.
    pub async fn run(self) {
        self.stage.run().await;
    }
}

#[async_trait]
impl Consume for Dispatch {
    type Item = Reminder;

    async fn consume(&mut self, reminder: Reminder) -> Flow {
        let message = OutgoingMessage::new(&reminder.recipient, reminder.subject(), "");
        match self.sink.send_message(&message).await {
            Ok(()) => info!("Sent reminder {} to {}", reminder.id, reminder.recipient),
            Err(source) => {
                self.reporter
                    .report(Error::Dispatch {
                        id: reminder.id,
                        recipient: reminder.recipient,
                        source,
                    })
                    .await;
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mail::MemorySink;
    use chrono::Utc;

    #[tokio::test]
    async fn test_sends_reminder_email() {
        let sink = MemorySink::new();
        let (tx, rx) = mpsc::channel(4);
        let (sender, mut errors) = ReminderSender::new(rx, Arc::new(sink.clone()), 4);

        tx.send(Reminder::new("a@x.com", "buy milk", Utc::now()))
            .await
            .unwrap();
        drop(tx);
        sender.run().await;

        assert_eq!(
            sink.sent().await,
            vec![OutgoingMessage::new("a@x.com", "Reminder: buy milk", "")]
        );
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_failure_is_reported() {
        let sink = MemorySink::new();
        sink.set_failing(true);
        let (tx, rx) = mpsc::channel(4);
        let (mut sender, mut errors) = ReminderSender::new(rx, Arc::new(sink.clone()), 4);

        let reminder = Reminder::new("a@x.com", "x", Utc::now());
        tx.send(reminder.clone()).await.unwrap();

        assert_eq!(sender.step().await, Flow::Continue);
        assert!(matches!(
            errors.recv().await,
            Some(Error::Dispatch { id, .. }) if id == reminder.id
        ));
        assert!(sink.sent().await.is_empty());
    }
}
