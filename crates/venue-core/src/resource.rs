//! Bookable resources and their keys.
//!
//! A [`Resource`] describes one family of capacity-bounded units: dated visit
//! slots or activity seats. The booking algorithm is written once against this
//! trait; each family only supplies its key type, how a key maps onto its
//! [`CapacityConfig`], and when a key stops accepting reservations.

use std::{fmt, hash::Hash, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
  Error, Result, capacity::CapacityConfig, reservation::ReservationStatus,
};

// ─── ResourceKind ────────────────────────────────────────────────────────────

/// The discriminant stored alongside every config and reservation row.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
  Visit,
  Activity,
}

// ─── TimeSlot ────────────────────────────────────────────────────────────────

/// A daily opening window, written `HH:MM-HH:MM`.
///
/// The textual form is always zero-padded, so sorting by text and sorting by
/// start time agree.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSlot {
  start: NaiveTime,
  end:   NaiveTime,
}

impl TimeSlot {
  pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
    if start >= end {
      return Err(Error::Validation(format!(
        "time slot {}-{} must start before it ends",
        start.format("%H:%M"),
        end.format("%H:%M"),
      )));
    }
    Ok(Self { start, end })
  }

  pub fn start(&self) -> NaiveTime { self.start }

  pub fn end(&self) -> NaiveTime { self.end }
}

impl FromStr for TimeSlot {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let invalid =
      || Error::Validation(format!("time slot {s:?} is not HH:MM-HH:MM"));
    let parse = |part: &str| {
      if part.len() != 5 {
        return None;
      }
      NaiveTime::parse_from_str(part, "%H:%M").ok()
    };

    let (start, end) = s.split_once('-').ok_or_else(invalid)?;
    match (parse(start), parse(end)) {
      (Some(start), Some(end)) => Self::new(start, end),
      _ => Err(invalid()),
    }
  }
}

impl TryFrom<String> for TimeSlot {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<TimeSlot> for String {
  fn from(slot: TimeSlot) -> Self { slot.to_string() }
}

impl fmt::Display for TimeSlot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
  }
}

// ─── SlotKey ─────────────────────────────────────────────────────────────────

/// A visit slot on a specific calendar date, written `YYYY-MM-DD/HH:MM-HH:MM`.
///
/// Ordered by date, then by slot.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct SlotKey {
  pub date:      NaiveDate,
  pub time_slot: TimeSlot,
}

impl SlotKey {
  pub fn new(date: NaiveDate, time_slot: TimeSlot) -> Self {
    Self { date, time_slot }
  }
}

impl fmt::Display for SlotKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.date.format("%Y-%m-%d"), self.time_slot)
  }
}

impl FromStr for SlotKey {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let (date, slot) = s.split_once('/').ok_or_else(|| {
      Error::Validation(format!("slot key {s:?} is not DATE/HH:MM-HH:MM"))
    })?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
      Error::Validation(format!("date {date:?} is not YYYY-MM-DD"))
    })?;
    Ok(Self { date, time_slot: slot.parse()? })
  }
}

impl TryFrom<String> for SlotKey {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<SlotKey> for String {
  fn from(key: SlotKey) -> Self { key.to_string() }
}

// ─── ActivityId ──────────────────────────────────────────────────────────────

/// Identifies one activity; doubles as its reservation key and config key.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActivityId(pub Uuid);

impl ActivityId {
  pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for ActivityId {
  fn default() -> Self { Self::new() }
}

impl fmt::Display for ActivityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.hyphenated().fmt(f)
  }
}

impl FromStr for ActivityId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Uuid::parse_str(s)
      .map(Self)
      .map_err(|_| Error::Validation(format!("activity id {s:?} is not a UUID")))
  }
}

// ─── Resource trait ──────────────────────────────────────────────────────────

/// Bounds shared by reservation keys and config keys.
pub trait KeyType:
  Clone
  + Eq
  + Ord
  + Hash
  + fmt::Debug
  + fmt::Display
  + FromStr<Err = Error>
  + Serialize
  + DeserializeOwned
  + Send
  + Sync
  + 'static
{
}

impl<T> KeyType for T where
  T: Clone
    + Eq
    + Ord
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr<Err = Error>
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

/// A family of bookable units sharing one booking algorithm.
pub trait Resource: Send + Sync + 'static {
  /// The key a reservation is made against.
  type Key: KeyType;
  /// The key a [`CapacityConfig`] is stored under.
  type ConfigKey: KeyType;
  /// Parameters accepted by availability listings.
  type Filter: fmt::Debug + DeserializeOwned + Send + Sync + 'static;

  const KIND: ResourceKind;
  /// Status given to a freshly admitted reservation.
  const INITIAL_STATUS: ReservationStatus;
  /// The status marking a reservation as fulfilled.
  const TERMINAL_STATUS: ReservationStatus;
  /// Whether a reservation must carry contact details.
  const REQUIRES_CONTACT: bool;

  /// The config governing `key`.
  fn config_key(key: &Self::Key) -> Self::ConfigKey;

  /// The reservation key that `config` contributes to a listing for
  /// `filter`, or `None` if the config does not apply.
  fn key_for(
    config: &CapacityConfig<Self::ConfigKey>,
    filter: &Self::Filter,
  ) -> Option<Self::Key>;

  /// Reject keys that no longer accept reservations at `now`.
  fn check_open(
    key: &Self::Key,
    config: &CapacityConfig<Self::ConfigKey>,
    now: &DateTime<Tz>,
  ) -> Result<()>;

  /// Whether `status` is part of this resource's lifecycle.
  fn allows(status: ReservationStatus) -> bool {
    status == Self::INITIAL_STATUS
      || status == Self::TERMINAL_STATUS
      || matches!(
        status,
        ReservationStatus::Confirmed | ReservationStatus::Cancelled
      )
  }

  /// Whether a reservation may move from `from` to `to`.
  ///
  /// Nothing leaves `cancelled` or the terminal status.
  fn can_transition(from: ReservationStatus, to: ReservationStatus) -> bool {
    use ReservationStatus::*;

    if !Self::allows(from) || !Self::allows(to) {
      return false;
    }
    match (from, to) {
      (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) => {
        true
      }
      (Confirmed, to) => to == Self::TERMINAL_STATUS,
      _ => false,
    }
  }
}

fn closed(key: &impl fmt::Display, reason: impl Into<String>) -> Error {
  Error::Closed { key: key.to_string(), reason: reason.into() }
}

fn check_deadline(
  key: &impl fmt::Display,
  closes_at: Option<DateTime<Utc>>,
  now: &DateTime<Tz>,
) -> Result<()> {
  match closes_at {
    Some(deadline) if deadline <= now.with_timezone(&Utc) => Err(closed(
      key,
      format!(
        "registration closed at {}",
        deadline.with_timezone(&now.timezone()).to_rfc3339()
      ),
    )),
    _ => Ok(()),
  }
}

// ─── Visit ───────────────────────────────────────────────────────────────────

/// Dated visit appointments. One config per daily time slot applies to every
/// calendar date.
#[derive(Debug, Clone, Copy)]
pub struct Visit;

/// Availability filter for visits.
#[derive(Debug, Clone, Deserialize)]
pub struct VisitFilter {
  pub date: NaiveDate,
}

impl Resource for Visit {
  type Key = SlotKey;
  type ConfigKey = TimeSlot;
  type Filter = VisitFilter;

  const KIND: ResourceKind = ResourceKind::Visit;
  const INITIAL_STATUS: ReservationStatus = ReservationStatus::Pending;
  const TERMINAL_STATUS: ReservationStatus = ReservationStatus::Completed;
  const REQUIRES_CONTACT: bool = true;

  fn config_key(key: &SlotKey) -> TimeSlot { key.time_slot }

  fn key_for(
    config: &CapacityConfig<TimeSlot>,
    filter: &VisitFilter,
  ) -> Option<SlotKey> {
    config
      .eligibility
      .admits(filter.date)
      .then(|| SlotKey::new(filter.date, config.key))
  }

  fn check_open(
    key: &SlotKey,
    config: &CapacityConfig<TimeSlot>,
    now: &DateTime<Tz>,
  ) -> Result<()> {
    if key.date < now.date_naive() {
      return Err(closed(key, format!("{} is in the past", key.date)));
    }
    if !config.eligibility.admits(key.date) {
      return Err(closed(key, "slot is only offered on weekdays"));
    }
    check_deadline(key, config.closes_at, now)
  }
}

// ─── Activity ────────────────────────────────────────────────────────────────

/// Activity registrations. Each activity carries its own capacity and
/// registration deadline.
#[derive(Debug, Clone, Copy)]
pub struct Activity;

/// Availability filter for activities; lists every open activity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityFilter {}

impl Resource for Activity {
  type Key = ActivityId;
  type ConfigKey = ActivityId;
  type Filter = ActivityFilter;

  const KIND: ResourceKind = ResourceKind::Activity;
  const INITIAL_STATUS: ReservationStatus = ReservationStatus::Confirmed;
  const TERMINAL_STATUS: ReservationStatus = ReservationStatus::Attended;
  const REQUIRES_CONTACT: bool = false;

  fn config_key(key: &ActivityId) -> ActivityId { *key }

  fn key_for(
    config: &CapacityConfig<ActivityId>,
    _filter: &ActivityFilter,
  ) -> Option<ActivityId> {
    Some(config.key)
  }

  fn check_open(
    key: &ActivityId,
    config: &CapacityConfig<ActivityId>,
    now: &DateTime<Tz>,
  ) -> Result<()> {
    check_deadline(key, config.closes_at, now)
  }
}
