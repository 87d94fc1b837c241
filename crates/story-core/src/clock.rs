//! Wall-clock source.

use chrono::Utc;

/// Unix time in seconds. Expiry and staleness decisions read it; timers only
/// decide when to look again.
pub trait Clock: Send + Sync {
  fn unix_time(&self) -> i32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn unix_time(&self) -> i32 {
    i32::try_from(Utc::now().timestamp()).unwrap_or(i32::MAX)
  }
}
