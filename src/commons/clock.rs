//! Time source for session expiry and signing timestamps.

use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// A point in time, always UTC.
pub type Time = DateTime<Utc>;


//------------ Clock ---------------------------------------------------------

/// Tells the current time.
///
/// Components take an `Arc<dyn Clock>` rather than calling `Utc::now()`
/// directly so that expiry can be tested without waiting.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Time;
}


//------------ SystemClock ---------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Time {
        Utc::now()
    }
}


//------------ ManualClock ---------------------------------------------------

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<Time>,
}

impl ManualClock {
    pub fn new(start: Time) -> Self {
        ManualClock { now: RwLock::new(start) }
    }

    /// Starts at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.write().unwrap();
        *now += by;
    }

    pub fn set(&self, time: Time) {
        *self.now.write().unwrap() = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Time {
        *self.now.read().unwrap()
    }
}


//============ Tests =========================================================
