//! Reminder storage repository.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::debug;

use super::model::{Reminder, ReminderId};
use crate::{Error, Result};

/// Persistent storage for reminders.
///
/// Every method runs as one short transaction; nothing is held open between
/// calls, so the store can be shared by the saver and the querier.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Inserts a new reminder.
    async fn insert(&self, reminder: &Reminder) -> Result<()>;

    /// Overwrites the stored row with the same id.
    ///
    /// Returns [`Error::ReminderNotFound`] if no such row exists.
    async fn update(&self, reminder: &Reminder) -> Result<()>;

    /// Selects every unsent reminder with `due_time <= as_of`, oldest first.
    async fn select_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Reminder>>;

    /// Loads one reminder by id.
    async fn load(&self, id: ReminderId) -> Result<Option<Reminder>>;

    /// Lists the most recently due reminders, newest first.
    async fn list(&self, limit: u32) -> Result<Vec<Reminder>>;
}

/// `SQLite` implementation of [`ReminderStore`].
#[derive(Debug, Clone)]
pub struct SqliteReminderStore {
    pool: SqlitePool,
}

impl SqliteReminderStore {
    /// Connects to the database at `url`.
    ///
    /// `url` is either a full `sqlite:` URL or a plain file path, which is
    /// created if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite:{url}?mode=rwc")
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        debug!("Connected reminder store at {url}");
        Ok(Self { pool })
    }

    /// Create an in-memory store for testing, with the schema applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        // A second connection would see a different empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                generated_from_id TEXT,
                recipient TEXT NOT NULL,
                content TEXT NOT NULL,
                due_time TEXT NOT NULL,
                is_sent INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders(is_sent, due_time)
            ",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Reminder schema is up to date");
        Ok(())
    }

    /// Closes the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ReminderStore for SqliteReminderStore {
    async fn insert(&self, reminder: &Reminder) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO reminders
                (id, generated_from_id, recipient, content, due_time, is_sent)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(reminder.id.to_string())
        .bind(reminder.generated_from_id.as_deref())
        .bind(&reminder.recipient)
        .bind(&reminder.content)
        .bind(encode_time(reminder.due_time))
        .bind(reminder.is_sent)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, reminder: &Reminder) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r"
            UPDATE reminders
            SET generated_from_id = ?,
                recipient = ?,
                content = ?,
                due_time = ?,
                is_sent = ?
            WHERE id = ?
            ",
        )
        .bind(reminder.generated_from_id.as_deref())
        .bind(&reminder.recipient)
        .bind(&reminder.content)
        .bind(encode_time(reminder.due_time))
        .bind(reminder.is_sent)
        .bind(reminder.id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ReminderNotFound(reminder.id));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn select_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let rows = sqlx::query(
            r"
            SELECT id, generated_from_id, recipient, content, due_time, is_sent
            FROM reminders
            WHERE is_sent = 0 AND due_time <= ?
            ORDER BY due_time ASC, id ASC
            ",
        )
        .bind(encode_time(as_of))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn load(&self, id: ReminderId) -> Result<Option<Reminder>> {
        let row = sqlx::query(
            r"
            SELECT id, generated_from_id, recipient, content, due_time, is_sent
            FROM reminders
            WHERE id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn list(&self, limit: u32) -> Result<Vec<Reminder>> {
        let rows = sqlx::query(
            r"
            SELECT id, generated_from_id, recipient, content, due_time, is_sent
            FROM reminders
            ORDER BY due_time DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }
}

/// Fixed-width UTC text with nanoseconds, so that string comparison in SQL
/// orders by instant and decoding gives back the exact value.
fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_row(row: &SqliteRow) -> Result<Reminder> {
    let raw_id: String = row.try_get("id")?;
    let invalid = |reason: String| Error::InvalidRow {
        id: raw_id.clone(),
        reason,
    };

    let id = raw_id
        .parse::<ReminderId>()
        .map_err(|e| invalid(e.to_string()))?;
    let due_time: String = row.try_get("due_time")?;
    let due_time = DateTime::parse_from_rfc3339(&due_time)
        .map_err(|e| invalid(format!("due_time {due_time:?}: {e}")))?
        .with_timezone(&Utc);

    Ok(Reminder {
        id,
        generated_from_id: row.try_get("generated_from_id")?,
        due_time,
        recipient: row.try_get("recipient")?,
        content: row.try_get("content")?,
        is_sent: row.try_get("is_sent")?,
    })
}
