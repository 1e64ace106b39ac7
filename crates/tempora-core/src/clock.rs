//! Time sources for the mutation engine.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, DurationRound as _, Utc};

/// Supplies the instant used for `starts_at`/`ends_at` of one mutation.
pub trait Clock: Send + Sync + 'static {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time truncated to microseconds (the stored precision).
///
/// Successive calls are strictly increasing: if the wall clock has not moved
/// past the previous instant, the previous instant plus one microsecond is
/// returned instead.
#[derive(Debug, Default)]
pub struct SystemClock {
  last: Mutex<Option<DateTime<Utc>>>,
}

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    let wall = Utc::now();
    let wall = wall.duration_trunc(Duration::microseconds(1)).unwrap_or(wall);
    let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
    let next = match *last {
      Some(prev) if wall <= prev => prev + Duration::microseconds(1),
      _ => wall,
    };
    *last = Some(next);
    next
  }
}

/// A clock that returns whatever it was last set to. Used to replay history
/// at chosen instants.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(at: DateTime<Utc>) -> Self { Self { now: Mutex::new(at) } }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
  }

  pub fn advance(&self, by: Duration) {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn system_clock_is_strictly_increasing() {
    let clock = SystemClock::default();
    let mut prev = clock.now();
    for _ in 0..1000 {
      let next = clock.now();
      assert!(next > prev);
      prev = next;
    }
  }

  #[test]
  fn manual_clock_advances() {
    let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
      .unwrap()
      .with_timezone(&Utc);
    let clock = ManualClock::new(start);
    clock.advance(Duration::seconds(5));
    assert_eq!(clock.now(), start + Duration::seconds(5));
  }
}
