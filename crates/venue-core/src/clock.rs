//! Time source fixed to the venue's civil timezone.
//!
//! Services read the clock once per operation and carry that instant through
//! every comparison, so "today" and "deadline passed" always agree within a
//! request.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::{Error, Result};

pub trait Clock: Send + Sync {
  /// The current instant, expressed in the venue timezone.
  fn now(&self) -> DateTime<Tz>;

  fn timezone(&self) -> Tz;
}

/// Wall clock in a fixed venue timezone.
#[derive(Debug, Clone, Copy)]
pub struct VenueClock {
  tz: Tz,
}

impl VenueClock {
  pub fn new(tz: Tz) -> Self { Self { tz } }
}

impl Clock for VenueClock {
  fn now(&self) -> DateTime<Tz> { Utc::now().with_timezone(&self.tz) }

  fn timezone(&self) -> Tz { self.tz }
}

/// A manually driven clock for tests.
#[derive(Debug)]
pub struct FixedClock {
  at: Mutex<DateTime<Tz>>,
}

impl FixedClock {
  pub fn new(at: DateTime<Tz>) -> Self { Self { at: Mutex::new(at) } }

  pub fn advance(&self, by: Duration) {
    let mut at = self.at.lock().unwrap_or_else(PoisonError::into_inner);
    *at += by;
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Tz> {
    *self.at.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn timezone(&self) -> Tz { self.now().timezone() }
}

/// Interpret a wall-clock time given in the venue timezone as an instant.
///
/// Ambiguous times (the repeated hour when clocks go back) resolve to the
/// earlier instant; times skipped by a forward jump are rejected.
pub fn venue_instant(tz: Tz, local: NaiveDateTime) -> Result<DateTime<Utc>> {
  match tz.from_local_datetime(&local) {
    LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => {
      Ok(at.with_timezone(&Utc))
    }
    LocalResult::None => Err(Error::Validation(format!(
      "{local} does not exist in {tz}"
    ))),
  }
}
