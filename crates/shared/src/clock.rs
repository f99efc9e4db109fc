//! Clock abstraction
//!
//! Every time-window derivation in the metering core goes through an
//! injected clock so period math is deterministic under test. Production
//! code uses [`SystemClock`]; tests pin a [`ManualClock`].

use std::sync::Mutex;

use time::OffsetDateTime;

/// Source of "now" for services that compute time windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock pinned to an explicit instant, advanced by hand.
///
/// Provided for tests and backfill tooling.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock to a new instant.
    pub fn set(&self, now: OffsetDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        self.now
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new(datetime!(2026-01-01 00:00:00 UTC));
        assert_eq!(clock.now(), datetime!(2026-01-01 00:00:00 UTC));

        clock.set(datetime!(2026-02-01 00:00:00 UTC));
        assert_eq!(clock.now(), datetime!(2026-02-01 00:00:00 UTC));
    }

    #[test]
    fn test_system_clock_is_utc() {
        let now = SystemClock.now();
        assert_eq!(now.offset(), time::UtcOffset::UTC);
    }
}
