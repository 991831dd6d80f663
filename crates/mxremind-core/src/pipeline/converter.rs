//! Reminder converter: parses mail subjects into reminders.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{Consume, Flow, Reporter, StageName, StageState, StreamStage};
use crate::Error;
use crate::clock::SharedClock;
use crate::mail::Mail;
use crate::reminder::Reminder;

/// Stream stage that turns each [`Mail`] into a [`Reminder`].
///
/// Subjects that aren't reminder requests are reported as
/// [`Error::NotAReminderSpec`] and dropped.
pub struct ReminderConverter {
    stage: StreamStage<Convert>,
}

struct Convert {
    clock: SharedClock,
    output: mpsc::Sender<Reminder>,
    reporter: Reporter,
}

impl ReminderConverter {
    /// Creates the converter reading from `input`, with its reminder and
    /// error outputs.
    #[must_use]
    pub fn new(
        input: mpsc::Receiver<Mail>,
        clock: SharedClock,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Reminder>, mpsc::Receiver<Error>) {
        let (output, reminders) = mpsc::channel(capacity);
        let (reporter, errors) = Reporter::channel(StageName::Converter, capacity);
        let work = Convert {
            clock,
            output,
            reporter,
        };
        let stage = StreamStage::new(StageName::Converter, input, work);
        (Self { stage }, reminders, errors)
    }

    /// Watches the converter's lifecycle.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StageState> {
        self.stage.subscribe()
    }

    /// Converts one mail. Returns [`Flow::Stop`] once the input is
    /// exhausted or the output is closed.
    pub async fn step(&mut self) -> Flow {
        self.stage.step().await
    }

    /// Converts until the input closes, then closes its outputs.
    pub async fn run(self) {
        self.stage.run().await;
    }
}

#[async_trait]
impl Consume for Convert {
    type Item = Mail;

    async fn consume(&mut self, mail: Mail) -> Flow {
        match Reminder::from_mail(&mail, self.clock.now()) {
            Ok(reminder) => {
                debug!(
                    "{} - {}: reminder {} due {}",
                    mail.from, mail.message_id, reminder.id, reminder.due_time
                );
                if self.output.send(reminder).await.is_err() {
                    warn!("Reminder output closed, stopping converter");
                    return Flow::Stop;
                }
            }
            Err(source) => {
                self.reporter
                    .report(Error::NotAReminderSpec {
                        sender: mail.from,
                        message_id: mail.message_id,
                        source,
                    })
                    .await;
            }
        }
        Flow::Continue
    }
}
