//! Reminder data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parse::{NotAReminderSpec, parse_spec};
use crate::mail::Mail;

/// Unique, generation-ordered identifier for a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReminderId(pub Uuid);

impl ReminderId {
    /// Generates a fresh time-ordered id.
    ///
    /// Ids generated by one process are strictly increasing, so two reminders
    /// created from the same fetch batch never collide.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for ReminderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ReminderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A scheduled notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    /// Unique identifier.
    pub id: ReminderId,
    /// Message-ID of the mail this reminder was generated from.
    pub generated_from_id: Option<String>,
    /// When the reminder is due, always UTC.
    pub due_time: DateTime<Utc>,
    /// Destination address.
    pub recipient: String,
    /// Text left over after the time specification.
    pub content: String,
    /// Whether the reminder was handed to the sender. Never reset.
    pub is_sent: bool,
}

impl Reminder {
    /// Creates a new unsent reminder that is not tied to any mail.
    #[must_use]
    pub fn new(
        recipient: impl Into<String>,
        content: impl Into<String>,
        due_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReminderId::generate(),
            generated_from_id: None,
            due_time,
            recipient: recipient.into(),
            content: content.into(),
            is_sent: false,
        }
    }

    /// Builds a reminder from a fetched mail by parsing its subject.
    ///
    /// `now` anchors relative specifications such as `tomorrow 09:00`.
    ///
    /// # Errors
    ///
    /// Returns [`NotAReminderSpec`] if the subject is not a reminder request.
    pub fn from_mail(mail: &Mail, now: DateTime<Utc>) -> Result<Self, NotAReminderSpec> {
        let spec = parse_spec(&mail.subject, mail.timezone, now)?;
        Ok(Self {
            id: ReminderId::generate(),
            generated_from_id: Some(mail.message_id.clone()),
            due_time: spec.due_time,
            recipient: mail.from.clone(),
            content: spec.content,
            is_sent: false,
        })
    }

    /// Returns true if the reminder is unsent and its due time has passed.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_sent && self.due_time <= now
    }

    /// Marks the reminder as sent.
    pub const fn mark_sent(&mut self) {
        self.is_sent = true;
    }

    /// Subject line of the reminder email.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("Reminder: {}", self.content)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Tz;

    fn mail(subject: &str) -> Mail {
        Mail {
            message_id: "<1@x.com>".to_string(),
            from: "a@x.com".to_string(),
            subject: subject.to_string(),
            timezone: Tz::UTC,
        }
    }

    #[test]
    fn test_from_mail() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let reminder = Reminder::from_mail(&mail("tomorrow 09:00 buy milk"), now).unwrap();

        assert_eq!(reminder.recipient, "a@x.com");
        assert_eq!(reminder.content, "buy milk");
        assert_eq!(reminder.generated_from_id.as_deref(), Some("<1@x.com>"));
        assert_eq!(
            reminder.due_time,
            Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
        );
        assert!(!reminder.is_sent);
    }

    #[test]
    fn test_from_mail_rejects_plain_subject() {
        let now = Utc::now();
        assert!(Reminder::from_mail(&mail("not a reminder"), now).is_err());
    }

    #[test]
    fn test_is_due_boundary() {
        let due = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        let mut reminder = Reminder::new("a@x.com", "x", due);

        assert!(reminder.is_due(due));
        assert!(!reminder.is_due(due - Duration::seconds(1)));

        reminder.mark_sent();
        assert!(!reminder.is_due(due + Duration::hours(1)));
    }

    #[test]
    fn test_ids_are_ordered_and_unique() {
        let ids: Vec<_> = (0..100).map(|_| ReminderId::generate()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_id_round_trips_through_string() {
        let id = ReminderId::generate();
        let parsed: ReminderId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_subject() {
        let reminder = Reminder::new("a@x.com", "buy milk", Utc::now());
        assert_eq!(reminder.subject(), "Reminder: buy milk");
    }
}
