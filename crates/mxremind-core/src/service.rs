//! The reminder service: wires the five stages together and runs them.
//!
//! ```text
//! source -> fetcher -> converter -> saver -> store
//!                          store -> querier -> sender -> sink
//! ```
//!
//! Every stage runs as its own task on a [`TaskTracker`]. Per-stage error
//! outputs are forwarded, tagged with the stage name, into one unbounded
//! stream available through [`Service::errors`].

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::mail::{ImapSource, MailSink, MailSource, SmtpSink};
use crate::pipeline::{
    DueReminderQuerier, MailFetcher, ReminderConverter, ReminderSaver, ReminderSender, StageName,
    StageState, capacity,
};
use crate::reminder::{ReminderStore, SqliteReminderStore};
use crate::{Error, Result};

/// An error raised by one stage, tagged with that stage's name.
#[derive(Debug, thiserror::Error)]
#[error("{stage}: {source}")]
pub struct ServiceError {
    /// Stage that raised the error.
    pub stage: StageName,
    /// The error itself.
    #[source]
    pub source: Error,
}

/// Capabilities the service runs against.
#[derive(Clone)]
pub struct Components {
    /// Reminder storage, shared by the saver and the querier.
    pub store: Arc<dyn ReminderStore>,
    /// Where reminder requests are fetched from.
    pub source: Arc<dyn MailSource>,
    /// Where reminder emails are sent.
    pub sink: Arc<dyn MailSink>,
    /// Wall clock for "today" and "now".
    pub clock: SharedClock,
}

/// Stages that haven't been started yet.
struct Stages {
    fetcher: MailFetcher,
    converter: ReminderConverter,
    saver: ReminderSaver,
    querier: DueReminderQuerier,
    sender: ReminderSender,
    errors: Vec<(StageName, mpsc::Receiver<Error>)>,
}

/// The reminder pipeline.
pub struct Service {
    stages: Option<Stages>,
    states: Vec<(StageName, watch::Receiver<StageState>)>,
    errors_tx: Option<mpsc::UnboundedSender<ServiceError>>,
    errors_rx: Option<mpsc::UnboundedReceiver<ServiceError>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    label: String,
}

impl Service {
    /// Wires all stages against the given components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an interval or the batch size is zero.
    pub fn new(config: &Config, components: Components) -> Result<Self> {
        if config.fetch_interval == 0 || config.send_interval == 0 {
            return Err(Error::Config("intervals must be at least one second".into()));
        }
        if config.max_messages == 0 {
            return Err(Error::Config("max_messages must be at least 1".into()));
        }
        let capacity = capacity(config.max_messages);
        let Components {
            store,
            source,
            sink,
            clock,
        } = components;

        let (fetcher, mail, fetcher_errors) = MailFetcher::new(source, config);
        let (converter, reminders, converter_errors) =
            ReminderConverter::new(mail, Arc::clone(&clock), capacity);
        let (saver, saver_errors) = ReminderSaver::new(reminders, Arc::clone(&store), capacity);

        let (querier, due, querier_errors) = DueReminderQuerier::new(store, clock, config);
        let (sender, sender_errors) = ReminderSender::new(due, sink, capacity);

        let states = vec![
            (StageName::Fetcher, fetcher.subscribe()),
            (StageName::Converter, converter.subscribe()),
            (StageName::Saver, saver.subscribe()),
            (StageName::Querier, querier.subscribe()),
            (StageName::Sender, sender.subscribe()),
        ];
        let errors = vec![
            (StageName::Fetcher, fetcher_errors),
            (StageName::Converter, converter_errors),
            (StageName::Saver, saver_errors),
            (StageName::Querier, querier_errors),
            (StageName::Sender, sender_errors),
        ];
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        Ok(Self {
            stages: Some(Stages {
                fetcher,
                converter,
                saver,
                querier,
                sender,
                errors,
            }),
            states,
            errors_tx: Some(errors_tx),
            errors_rx: Some(errors_rx),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            label: config.describe(),
        })
    }

    /// Builds the production service: `SQLite` store, IMAP source, SMTP
    /// sink and the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached or migrated, or
    /// if the configuration is rejected by [`Service::new`].
    pub async fn connect(config: &Config) -> Result<Self> {
        let store = SqliteReminderStore::connect(&config.database.url).await?;
        if config.database.migrate {
            store.migrate().await?;
        }
        let components = Components {
            store: Arc::new(store),
            source: Arc::new(ImapSource::new(config.imap.clone())),
            sink: Arc::new(SmtpSink::new(config.smtp.clone())),
            clock: Arc::new(SystemClock),
        };
        Self::new(config, components)
    }

    /// Takes the combined error stream. It ends once every stage is closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ErrorStreamTaken`] if it was already taken.
    pub fn errors(&mut self) -> Result<mpsc::UnboundedReceiver<ServiceError>> {
        self.errors_rx.take().ok_or(Error::ErrorStreamTaken)
    }

    /// Current lifecycle state of every stage, upstream first.
    #[must_use]
    pub fn stage_states(&self) -> Vec<(StageName, StageState)> {
        self.states
            .iter()
            .map(|(name, state)| (*name, *state.borrow()))
            .collect()
    }

    /// Starts every stage as its own task.
    ///
    /// Timer stages tick every period until [`Service::stop`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if the stages were already started.
    pub fn start(&mut self) -> Result<()> {
        let Stages {
            fetcher,
            converter,
            saver,
            querier,
            sender,
            ..
        } = self.take_stages()?;
        info!("{}: starting", self.label);

        self.tracker.spawn(fetcher.run(self.cancel.clone()));
        self.tracker.spawn(querier.run(self.cancel.clone()));
        self.tracker.spawn(converter.run());
        self.tracker.spawn(saver.run());
        self.tracker.spawn(sender.run());
        Ok(())
    }

    /// Cancels the timer stages and waits until every stage has closed and
    /// every error has been forwarded.
    ///
    /// An in-flight tick is allowed to finish. Calling `stop` on a service
    /// that was never started returns immediately.
    pub async fn stop(&self) {
        info!("{}: stopping", self.label);
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("{}: stopped", self.label);
    }

    /// Runs one tick of each timer stage, waits for the downstream stages
    /// to drain, and returns every error raised along the way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if the stages were already started,
    /// or [`Error::ErrorStreamTaken`] if [`Service::errors`] was called.
    pub async fn run_once(mut self) -> Result<Vec<ServiceError>> {
        let mut errors = self.errors_rx.take().ok_or(Error::ErrorStreamTaken)?;
        let Stages {
            fetcher,
            converter,
            saver,
            querier,
            sender,
            ..
        } = self.take_stages()?;
        info!("{}: running once", self.label);

        self.tracker.spawn(converter.run());
        self.tracker.spawn(saver.run());
        self.tracker.spawn(sender.run());
        self.tracker.spawn(async move {
            tokio::join!(fetcher.run_once(), querier.run_once());
        });
        self.tracker.close();
        self.tracker.wait().await;

        let mut collected = Vec::new();
        while let Some(error) = errors.recv().await {
            collected.push(error);
        }
        info!("{}: run finished with {} errors", self.label, collected.len());
        Ok(collected)
    }

    /// Takes the unstarted stages and spawns their error forwarders.
    fn take_stages(&mut self) -> Result<Stages> {
        let mut stages = self.stages.take().ok_or(Error::AlreadyStarted)?;
        let combined = self.errors_tx.take().ok_or(Error::AlreadyStarted)?;
        for (stage, errors) in stages.errors.drain(..) {
            self.tracker.spawn(forward(stage, errors, combined.clone()));
        }
        Ok(stages)
    }
}

/// Tags one stage's errors and pushes them into the combined stream.
async fn forward(
    stage: StageName,
    mut from: mpsc::Receiver<Error>,
    to: mpsc::UnboundedSender<ServiceError>,
) {
    while let Some(source) = from.recv().await {
        // Nobody listening is fine; the error was already logged.
        let _ = to.send(ServiceError { stage, source });
    }
}
