//! Wall clock anchored to the tokio timer.

use chrono::{DateTime, Utc};
use pipeline::Clock;
use tokio::time::Instant;

/// Reports wall-clock time as an anchor plus elapsed tokio time.
///
/// Under `tokio::time::pause` the clock advances with the mocked timer, so
/// credential reset times elapse in step with back-off sleeps.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(anchor_utc: DateTime<Utc>) -> Self {
        Self {
            anchor_utc,
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_utc + elapsed
    }
}
