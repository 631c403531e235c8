//! Time source used by the lease manager
//!
//! The manager and the gateway client never read the time directly, so tests
//! can substitute a clock they move forward by hand.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// Source of monotonic and wall-clock time
pub trait Clock {
    /// Current monotonic instant, used for scheduling
    fn now(&self) -> Instant;

    /// Current wall-clock time, used for log output
    fn wall_now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
