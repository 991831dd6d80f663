//! Mail fetcher: pulls the newest messages of the inbound mailbox.

use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Flow, Reporter, StageName, StageState, Tick, TimerStage, capacity};
use crate::Error;
use crate::config::Config;
use crate::mail::{Mail, MailSource, MailboxSession, SeqRange};

/// Timer stage that turns inbound messages into [`Mail`] records.
///
/// Each tick opens a session, reads the envelopes of at most
/// `max_messages` of the newest messages, emits them, then moves them to
/// the processed mailbox so they are never fetched twice.
pub struct MailFetcher {
    stage: TimerStage<Fetch>,
}

struct Fetch {
    source: Arc<dyn MailSource>,
    label: String,
    inbound: String,
    processed: String,
    timezone: Tz,
    max_messages: u32,
    output: mpsc::Sender<Mail>,
    reporter: Reporter,
}

impl MailFetcher {
    /// Creates the fetcher with its mail and error outputs.
    #[must_use]
    pub fn new(
        source: Arc<dyn MailSource>,
        config: &Config,
    ) -> (Self, mpsc::Receiver<Mail>, mpsc::Receiver<Error>) {
        let capacity = capacity(config.max_messages);
        let (output, mail) = mpsc::channel(capacity);
        let (reporter, errors) = Reporter::channel(StageName::Fetcher, capacity);
        let work = Fetch {
            source,
            label: config.describe(),
            inbound: config.mailbox.inbound.clone(),
            processed: config.mailbox.processed.clone(),
            timezone: config.timezone,
            max_messages: config.max_messages,
            output,
            reporter,
        };
        let stage = TimerStage::new(StageName::Fetcher, config.fetch_period(), work);
        (Self { stage }, mail, errors)
    }

    /// Watches the fetcher's lifecycle.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StageState> {
        self.stage.subscribe()
    }

    /// Fetches every period until `cancel` fires, then closes its outputs.
    pub async fn run(self, cancel: CancellationToken) {
        self.stage.run(cancel).await;
    }

    /// Fetches once, then closes its outputs.
    pub async fn run_once(self) {
        self.stage.run_once().await;
    }
}

#[async_trait]
impl Tick for Fetch {
    async fn tick(&mut self) -> Flow {
        let mut session = match self.source.connect().await {
            Ok(session) => session,
            Err(e) => {
                self.reporter.report(e.into()).await;
                return Flow::Continue;
            }
        };

        let flow = self.fetch(session.as_mut()).await;

        if let Err(e) = session.logout().await {
            warn!("{}: logout failed: {e}", self.label);
        }
        flow
    }
}

impl Fetch {
    async fn fetch(&self, session: &mut dyn MailboxSession) -> Flow {
        let count = match session.select_mailbox(&self.inbound).await {
            Ok(count) => count,
            Err(e) => {
                self.reporter.report(e.into()).await;
                return Flow::Continue;
            }
        };
        info!("{} contains {count} messages", self.label);

        let Some(range) = SeqRange::last_n(self.max_messages, count) else {
            return Flow::Continue;
        };
        debug!("{} fetching messages {range}", self.label);

        let envelopes = match session.fetch_envelopes(range).await {
            Ok(envelopes) => envelopes,
            Err(e) => {
                self.reporter.report(e.into()).await;
                return Flow::Continue;
            }
        };

        for envelope in envelopes {
            let Some(from) = envelope.from else {
                self.reporter
                    .report(Error::MissingSender(envelope.message_id))
                    .await;
                continue;
            };
            let mail = Mail {
                message_id: envelope.message_id,
                from,
                subject: envelope.subject,
                timezone: self.timezone,
            };
            if self.output.send(mail).await.is_err() {
                warn!("{}: mail output closed, leaving messages in place", self.label);
                return Flow::Stop;
            }
        }

        match session.relocate(range, &self.processed).await {
            Ok(()) => debug!("{} moved {} messages to {}", self.label, range.count(), self.processed),
            Err(e) => self.reporter.report(e.into()).await,
        }
        Flow::Continue
    }
}
