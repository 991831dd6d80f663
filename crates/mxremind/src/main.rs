//! `mxremind` -- email reminder service.
//!
//! Mail yourself a subject like `tomorrow 09:00 buy milk` and the service
//! mails `Reminder: buy milk` back at that time.
//!
//! - `mxremind start` -- run the service until SIGINT/SIGTERM.
//! - `mxremind batch` -- process one batch and exit.
//! - `mxremind migrate` -- create the reminder schema.
//! - `mxremind config` -- print the effective configuration.
//! - `mxremind mailboxes` -- list the IMAP mailboxes.
//! - `mxremind fetch` -- print the newest messages of a mailbox.
//! - `mxremind send` -- send one email through the SMTP server.
//! - `mxremind list` -- print stored reminders.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mxremind_core::{
    Config, ConsoleSink, ImapSource, MailSink, MailSource, OutgoingMessage, ReminderStore,
    Service, SmtpSink, SqliteReminderStore, fetch_latest,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod settings;

/// Destination of `fetch --trash`.
const TRASH: &str = "Trash";

/// Set and send mail reminders.
#[derive(Parser)]
#[command(name = "mxremind", version, about = "Set and send mail reminders")]
struct Cli {
    /// Config file (default is ./mxremind.yaml).
    #[arg(long, global = true, env = "MXREMIND_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the mail reminder service.
    Start {
        /// Migrate the database schema first.
        #[arg(long)]
        migrate: bool,
    },

    /// Process a single batch of mail reminders.
    Batch {
        /// Migrate the database schema first.
        #[arg(long)]
        migrate: bool,
    },

    /// Create or update the database schema.
    Migrate,

    /// Print the current configuration in YAML format.
    Config,

    /// List the mailboxes of the IMAP account.
    Mailboxes,

    /// Print sender and subject of the newest messages in a mailbox.
    Fetch {
        /// Mailbox to read.
        mailbox: String,
        /// Number of messages to fetch.
        #[arg(long, default_value = "1")]
        count: u32,
        /// Move the fetched messages to Trash.
        #[arg(long)]
        trash: bool,
    },

    /// Send an email.
    Send {
        /// Recipient address.
        address: String,
        /// Subject line.
        subject: String,
        /// Print the message instead of sending it.
        #[arg(long)]
        dry_run: bool,
    },

    /// List stored reminders, most recently due first.
    List {
        /// Maximum number of reminders to print.
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "mxremind=debug,mxremind_core=debug"
    } else {
        "mxremind=info,mxremind_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Start { migrate } => {
            config.database.migrate |= migrate;
            start(&config).await?;
        }
        Commands::Batch { migrate } => {
            config.database.migrate |= migrate;
            return batch(&config).await;
        }
        Commands::Migrate => {
            let store = SqliteReminderStore::connect(&config.database.url).await?;
            store.migrate().await?;
            store.close().await;
            info!("Database schema is up to date");
        }
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&settings::redacted(&config))?);
        }
        Commands::Mailboxes => mailboxes(&config).await?,
        Commands::Fetch {
            mailbox,
            count,
            trash,
        } => fetch(&config, &mailbox, count, trash).await?,
        Commands::Send {
            address,
            subject,
            dry_run,
        } => {
            let message = OutgoingMessage::new(address, subject, "");
            let sink: Box<dyn MailSink> = if dry_run {
                Box::new(ConsoleSink)
            } else {
                Box::new(SmtpSink::new(config.smtp.clone()))
            };
            sink.send_message(&message)
                .await
                .context("sending email")?;
            info!("Sent {:?} to {}", message.subject, message.to);
        }
        Commands::List { limit } => list(&config, limit).await?,
    }
    Ok(ExitCode::SUCCESS)
}

fn validate(config: &Config) -> Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("{e}");
        }
        bail!("invalid configuration ({} problems)", errors.len());
    }
    Ok(())
}

async fn start(config: &Config) -> Result<()> {
    validate(config)?;
    let mut service = Service::connect(config).await?;

    let mut errors = service.errors()?;
    let logger = tokio::spawn(async move {
        while let Some(e) = errors.recv().await {
            error!("{e}");
        }
    });

    service.start()?;
    shutdown_signal().await?;
    info!("Received shutdown signal");
    service.stop().await;

    if let Err(e) = logger.await {
        warn!("Error logger failed: {e}");
    }
    Ok(())
}

async fn batch(config: &Config) -> Result<ExitCode> {
    validate(config)?;
    let service = Service::connect(config).await?;

    let errors = service.run_once().await?;
    for e in &errors {
        error!("{e}");
    }
    Ok(if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn mailboxes(config: &Config) -> Result<()> {
    let mut session = ImapSource::new(config.imap.clone())
        .connect()
        .await
        .context("connecting to IMAP server")?;
    let names = session.list_mailboxes().await;
    if let Err(e) = session.logout().await {
        warn!("Logout failed: {e}");
    }
    for name in names? {
        println!("{name}");
    }
    Ok(())
}

async fn fetch(config: &Config, mailbox: &str, count: u32, trash: bool) -> Result<()> {
    println!("Mail for {:?}", config.imap.address);
    let mut session = ImapSource::new(config.imap.clone())
        .connect()
        .await
        .context("connecting to IMAP server")?;
    let envelopes = fetch_latest(session.as_mut(), mailbox, count, trash.then_some(TRASH)).await;
    if let Err(e) = session.logout().await {
        warn!("Logout failed: {e}");
    }
    for envelope in envelopes.with_context(|| format!("fetching from {mailbox}"))? {
        println!(
            "{:?} {:?}",
            envelope.from.as_deref().unwrap_or_default(),
            envelope.subject
        );
    }
    Ok(())
}

async fn list(config: &Config, limit: u32) -> Result<()> {
    let store = SqliteReminderStore::connect(&config.database.url).await?;
    for reminder in store.list(limit).await? {
        println!(
            "{}  {}  {}  {:<24}  {}",
            reminder.id,
            reminder.due_time.format("%Y-%m-%d %H:%M"),
            if reminder.is_sent { "sent" } else { "    " },
            reminder.recipient,
            reminder.content,
        );
    }
    store.close().await;
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
