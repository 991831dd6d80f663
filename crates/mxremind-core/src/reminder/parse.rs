//! Time specification parsing for reminder subjects.
//!
//! A reminder subject starts with a time specification followed by the
//! reminder text. Patterns are tried in a fixed order and the first one whose
//! leading tokens match wins:
//!
//! 1. `tomorrow HH:MM <content>`
//! 2. `MM/DD HH:MM <content>`
//! 3. `YYYY-MM-DD HH:MM <content>`
//! 4. `HH:MM <content>`
//!
//! Times are local to the reference timezone and resolved to UTC.

use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;

/// Reason a subject is not a reminder request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotAReminderSpec {
    /// No pattern matched the start of the subject.
    #[error("no time specification found")]
    NoMatch,

    /// A pattern matched structurally but a numeric field is out of range.
    #[error("invalid date/time {input:?}: {source}")]
    InvalidDateTime {
        /// The offending date or time token.
        input: String,
        /// Underlying parse failure.
        source: chrono::format::ParseError,
    },

    /// The local time falls in a gap of the reference timezone (DST change).
    #[error("{0} does not exist in the reference timezone")]
    NonexistentLocalTime(NaiveDateTime),
}

/// The pattern that matched a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// `tomorrow HH:MM`
    Tomorrow,
    /// `MM/DD HH:MM`
    MonthDay,
    /// `YYYY-MM-DD HH:MM`
    FullDate,
    /// `HH:MM`
    TimeOfDay,
}

/// A successfully parsed reminder subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSpec {
    /// Absolute due time.
    pub due_time: DateTime<Utc>,
    /// Text after the time specification.
    pub content: String,
    /// Which pattern matched.
    pub pattern: Pattern,
}

struct Grammar {
    pattern: Pattern,
    regex: Regex,
}

#[allow(clippy::expect_used)] // patterns are static and tested
static GRAMMAR: LazyLock<[Grammar; 4]> = LazyLock::new(|| {
    let rule = |pattern, re: &str| Grammar {
        pattern,
        regex: Regex::new(re).expect("static time spec pattern"),
    };
    [
        rule(
            Pattern::Tomorrow,
            r"^(?i:tomorrow)\s+(?P<time>\d{1,2}:\d{2})\s+(?P<content>.+)$",
        ),
        rule(
            Pattern::MonthDay,
            r"^(?P<date>\d{1,2}/\d{1,2})\s+(?P<time>\d{1,2}:\d{2})\s+(?P<content>.+)$",
        ),
        rule(
            Pattern::FullDate,
            r"^(?P<date>\d{4}-\d{1,2}-\d{1,2})\s+(?P<time>\d{1,2}:\d{2})\s+(?P<content>.+)$",
        ),
        rule(
            Pattern::TimeOfDay,
            r"^(?P<time>\d{1,2}:\d{2})\s+(?P<content>.+)$",
        ),
    ]
});

/// Parses a reminder subject into an absolute due time and its content.
///
/// `zone` is the reference timezone for the local date and time, `now`
/// determines what "today" and the current year are in that zone.
///
/// # Errors
///
/// Returns [`NotAReminderSpec`] if no pattern matches, if a matching
/// pattern carries an invalid date or time, or if the local time does not
/// exist in `zone`.
pub fn parse_spec(subject: &str, zone: Tz, now: DateTime<Utc>) -> Result<TimeSpec, NotAReminderSpec> {
    let subject = subject.trim();
    for grammar in GRAMMAR.iter() {
        let Some(captures) = grammar.regex.captures(subject) else {
            continue;
        };
        let time = parse_time(&captures["time"])?;
        let date = captures.name("date").map(|m| m.as_str());
        let local = resolve(grammar.pattern, date, time, zone, now)?;
        return Ok(TimeSpec {
            due_time: localize(local, zone)?,
            content: captures["content"].trim_end().to_string(),
            pattern: grammar.pattern,
        });
    }
    Err(NotAReminderSpec::NoMatch)
}

fn resolve(
    pattern: Pattern,
    date: Option<&str>,
    time: NaiveTime,
    zone: Tz,
    now: DateTime<Utc>,
) -> Result<NaiveDateTime, NotAReminderSpec> {
    let today = now.with_timezone(&zone).date_naive();
    let date = match (pattern, date) {
        (Pattern::Tomorrow, _) => today
            .checked_add_days(Days::new(1))
            .ok_or_else(|| NotAReminderSpec::NonexistentLocalTime(today.and_time(time)))?,
        (Pattern::MonthDay, Some(month_day)) => {
            parse_date(&format!("{}/{month_day}", today.year()), "%Y/%m/%d")?
        }
        (Pattern::FullDate, Some(full)) => parse_date(full, "%Y-%m-%d")?,
        _ => today,
    };
    Ok(date.and_time(time))
}

fn parse_time(input: &str) -> Result<NaiveTime, NotAReminderSpec> {
    NaiveTime::parse_from_str(input, "%H:%M").map_err(|source| NotAReminderSpec::InvalidDateTime {
        input: input.to_string(),
        source,
    })
}

fn parse_date(input: &str, format: &str) -> Result<NaiveDate, NotAReminderSpec> {
    NaiveDate::parse_from_str(input, format).map_err(|source| NotAReminderSpec::InvalidDateTime {
        input: input.to_string(),
        source,
    })
}

fn localize(local: NaiveDateTime, zone: Tz) -> Result<DateTime<Utc>, NotAReminderSpec> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => Ok(t.with_timezone(&Utc)),
        LocalResult::None => Err(NotAReminderSpec::NonexistentLocalTime(local)),
    }
}
