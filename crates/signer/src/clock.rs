use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use crate::SigningError;

/// Source of signing timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Result<DateTime<Utc>, SigningError>;
}

/// Wall clock, optionally shifted to match the server's clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    skew: TimeDelta,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a known offset between local and server time.
    pub fn with_skew(skew: TimeDelta) -> Self {
        Self { skew }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Result<DateTime<Utc>, SigningError> {
        Utc::now()
            .checked_add_signed(self.skew)
            .ok_or(SigningError::ClockUnavailable)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Option<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(Some(now)),
        }
    }

    /// A clock with no time source; signing fails with `ClockUnavailable`.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.and_then(|t| t.checked_add_signed(by));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Result<DateTime<Utc>, SigningError> {
        self.now
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or(SigningError::ClockUnavailable)
    }
}
