//! The five pipeline stages and the machinery they share.
//!
//! Timer stages ([`MailFetcher`], [`DueReminderQuerier`]) do one unit of
//! work per tick until cancelled. Stream stages ([`ReminderConverter`],
//! [`ReminderSaver`], [`ReminderSender`]) do one unit of work per input
//! item until their input closes. Either way a stage closes its outputs
//! when it finishes, which is how termination travels downstream.
//!
//! Every stage moves through [`StageState`] once, in order, and publishes
//! its state on a watch channel.

mod converter;
mod fetcher;
mod querier;
mod saver;
mod sender;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Error;

pub use converter::ReminderConverter;
pub use fetcher::MailFetcher;
pub use querier::DueReminderQuerier;
pub use saver::ReminderSaver;
pub use sender::ReminderSender;

/// Identifies a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageName {
    /// Pulls mail from the source.
    Fetcher,
    /// Parses mail into reminders.
    Converter,
    /// Persists reminders.
    Saver,
    /// Selects due reminders.
    Querier,
    /// Dispatches due reminders.
    Sender,
}

impl StageName {
    /// All stages, upstream first.
    pub const ALL: [Self; 5] = [
        Self::Fetcher,
        Self::Converter,
        Self::Saver,
        Self::Querier,
        Self::Sender,
    ];

    /// Lowercase name used in logs and error tags.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fetcher => "fetcher",
            Self::Converter => "converter",
            Self::Saver => "saver",
            Self::Querier => "querier",
            Self::Sender => "sender",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a stage. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageState {
    /// Constructed, not yet running.
    Created,
    /// Doing work.
    Running,
    /// Stopped accepting work, closing outputs.
    Draining,
    /// Outputs closed; the stage is done.
    Closed,
}

/// Outcome of one unit of stage work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going.
    Continue,
    /// Finish the stage.
    Stop,
}

/// Publishes a stage's [`StageState`].
#[derive(Debug)]
pub(crate) struct Lifecycle {
    stage: StageName,
    state: watch::Sender<StageState>,
}

impl Lifecycle {
    pub(crate) fn new(stage: StageName) -> Self {
        let (state, _) = watch::channel(StageState::Created);
        Self { stage, state }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StageState> {
        self.state.subscribe()
    }

    fn transition(&self, to: StageState) {
        let from = self.state.send_replace(to);
        debug!(stage = %self.stage, "{from:?} -> {to:?}");
    }
}

/// Sends a stage's per-item errors to its error output.
#[derive(Debug, Clone)]
pub(crate) struct Reporter {
    stage: StageName,
    errors: mpsc::Sender<Error>,
}

impl Reporter {
    /// Creates a reporter and the receiving end of its error output.
    pub(crate) fn channel(stage: StageName, capacity: usize) -> (Self, mpsc::Receiver<Error>) {
        let (errors, rx) = mpsc::channel(capacity);
        (Self { stage, errors }, rx)
    }

    pub(crate) async fn report(&self, error: Error) {
        if error.is_not_a_reminder() {
            debug!(stage = %self.stage, "{error}");
        } else {
            warn!(stage = %self.stage, "{error}");
        }
        if self.errors.send(error).await.is_err() {
            debug!(stage = %self.stage, "Error output closed, dropping error");
        }
    }
}

/// One scheduled unit of work of a timer stage.
#[async_trait]
pub(crate) trait Tick: Send {
    async fn tick(&mut self) -> Flow;
}

/// One input item's worth of work of a stream stage.
#[async_trait]
pub(crate) trait Consume: Send {
    type Item: Send;

    async fn consume(&mut self, item: Self::Item) -> Flow;
}

/// Drives a [`Tick`] on a fixed period until cancelled.
#[derive(Debug)]
pub(crate) struct TimerStage<T> {
    lifecycle: Lifecycle,
    period: Duration,
    work: T,
}

impl<T: Tick> TimerStage<T> {
    pub(crate) fn new(stage: StageName, period: Duration, work: T) -> Self {
        Self {
            lifecycle: Lifecycle::new(stage),
            period,
            work,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StageState> {
        self.lifecycle.subscribe()
    }

    /// Ticks every period, the first one a full period after start.
    ///
    /// Cancellation is checked first, so a fired token wins over a ready
    /// tick; a tick that already started always runs to completion.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        let Self {
            lifecycle,
            period,
            mut work,
        } = self;
        lifecycle.transition(StageState::Running);

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(stage = %lifecycle.stage, "Cancellation acknowledged");
                    break;
                }
                _ = ticker.tick() => {
                    if work.tick().await == Flow::Stop {
                        break;
                    }
                }
            }
        }

        finish(lifecycle, work);
    }

    /// Runs exactly one tick, then closes.
    pub(crate) async fn run_once(self) {
        let Self {
            lifecycle,
            mut work,
            ..
        } = self;
        lifecycle.transition(StageState::Running);
        work.tick().await;
        finish(lifecycle, work);
    }
}

/// Drives a [`Consume`] over an input channel until it closes.
#[derive(Debug)]
pub(crate) struct StreamStage<C: Consume> {
    lifecycle: Lifecycle,
    input: mpsc::Receiver<C::Item>,
    work: C,
}

impl<C: Consume> StreamStage<C> {
    pub(crate) fn new(stage: StageName, input: mpsc::Receiver<C::Item>, work: C) -> Self {
        Self {
            lifecycle: Lifecycle::new(stage),
            input,
            work,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StageState> {
        self.lifecycle.subscribe()
    }

    /// Waits for one item and processes it. Stops once the input is closed
    /// and empty.
    pub(crate) async fn step(&mut self) -> Flow {
        match self.input.recv().await {
            Some(item) => self.work.consume(item).await,
            None => Flow::Stop,
        }
    }

    pub(crate) async fn run(mut self) {
        self.lifecycle.transition(StageState::Running);
        while self.step().await == Flow::Continue {}

        let Self {
            lifecycle,
            input,
            work,
        } = self;
        drop(input);
        finish(lifecycle, work);
    }
}

/// Closes a stage's outputs by dropping its work, publishing each step.
fn finish<W>(lifecycle: Lifecycle, work: W) {
    lifecycle.transition(StageState::Draining);
    drop(work);
    lifecycle.transition(StageState::Closed);
}

/// Capacity of inter-stage and error channels for a batch size.
pub(crate) fn capacity(max_messages: u32) -> usize {
    usize::try_from(max_messages).unwrap_or(1).max(1)
}
