//! Wall-clock abstraction for testability.
//!
//! The converter resolves "today" and the querier resolves "now" through a
//! [`Clock`], so both can be driven deterministically in tests.
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use mxremind_core::clock::{Clock, MockClock};
//!
//! let clock = MockClock::at(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
//! clock.advance(Duration::hours(1));
//! assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};

/// Source of the current UTC instant.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock that uses real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests, with microsecond resolution.
#[derive(Debug)]
pub struct MockClock {
    micros: AtomicI64,
}

impl MockClock {
    /// Creates a mock clock frozen at the given instant.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(now.timestamp_micros()),
        }
    }

    /// Creates a mock clock that can be shared across tasks.
    #[must_use]
    pub fn shared(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self::at(now))
    }

    /// Moves the clock to the given instant.
    pub fn set(&self, now: DateTime<Utc>) {
        self.micros.store(now.timestamp_micros(), Ordering::SeqCst);
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, by: Duration) {
        let micros = by.num_microseconds().unwrap_or(i64::MAX);
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// A shared clock for dynamic dispatch.
pub type SharedClock = Arc<dyn Clock>;
