//! Reminders: the data model, the subject parser and persistent storage.

mod model;
mod parse;
mod repository;

pub use model::{Reminder, ReminderId};
pub use parse::{NotAReminderSpec, Pattern, TimeSpec, parse_spec};
pub use repository::{ReminderStore, SqliteReminderStore};
