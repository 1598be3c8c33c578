//! Reservations: a subject's claim on units of one resource key.
//!
//! Reservations are never deleted by the booking flow. Cancellation is a
//! status change so that the history of consumed capacity stays intact; only
//! an explicit administrative purge removes a row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resource::ResourceKind;

// ─── Status ──────────────────────────────────────────────────────────────────

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReservationStatus {
  Pending,
  Confirmed,
  Cancelled,
  Completed,
  Attended,
}

impl ReservationStatus {
  /// Statuses whose units count against capacity.
  pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Confirmed];

  pub fn is_active(self) -> bool { Self::ACTIVE.contains(&self) }

  /// Fulfilled reservations; they can no longer be cancelled.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Attended)
  }
}

// ─── Reservation ─────────────────────────────────────────────────────────────

/// How the venue can reach the party behind a visit booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
  pub name:  String,
  pub phone: String,
}

impl ContactInfo {
  /// Both fields present after trimming surrounding whitespace.
  pub fn normalized(&self) -> Option<Self> {
    let name = self.name.trim();
    let phone = self.phone.trim();
    (!name.is_empty() && !phone.is_empty()).then(|| Self {
      name:  name.to_owned(),
      phone: phone.to_owned(),
    })
  }
}

/// A persisted reservation against a key of type `K`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation<K> {
  pub id:         Uuid,
  pub subject_id: Uuid,
  pub kind:       ResourceKind,
  pub key:        K,
  pub units:      u32,
  pub status:     ReservationStatus,
  pub contact:    Option<ContactInfo>,
  /// Administrator notes.
  pub notes:      Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl<K> Reservation<K> {
  pub fn is_active(&self) -> bool { self.status.is_active() }
}

/// Input to [`crate::store::BookingStore::try_reserve`]. The id and
/// timestamps are assigned by the caller so the store stays clock-free.
#[derive(Debug, Clone)]
pub struct NewReservation<K> {
  pub id:         Uuid,
  pub subject_id: Uuid,
  pub key:        K,
  pub units:      u32,
  pub status:     ReservationStatus,
  pub contact:    Option<ContactInfo>,
  pub created_at: DateTime<Utc>,
}

// ─── Administrative inputs ───────────────────────────────────────────────────

/// An administrator's edit of one reservation. Either field may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
  pub status: Option<ReservationStatus>,
  pub notes:  Option<String>,
}

/// Filter for reservation listings. Results are newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReservationQuery {
  pub subject_id: Option<Uuid>,
  pub status:     Option<ReservationStatus>,
  /// Only reservations on this exact reservation key (text form).
  pub key:        Option<String>,
  pub limit:      Option<usize>,
  pub offset:     Option<usize>,
}

/// Number of reservations in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
  pub pending:   u64,
  pub confirmed: u64,
  pub cancelled: u64,
  pub completed: u64,
  pub attended:  u64,
}

impl StatusCounts {
  pub fn add(&mut self, status: ReservationStatus, n: u64) {
    let slot = match status {
      ReservationStatus::Pending => &mut self.pending,
      ReservationStatus::Confirmed => &mut self.confirmed,
      ReservationStatus::Cancelled => &mut self.cancelled,
      ReservationStatus::Completed => &mut self.completed,
      ReservationStatus::Attended => &mut self.attended,
    };
    *slot += n;
  }

  pub fn total(&self) -> u64 {
    self.pending + self.confirmed + self.cancelled + self.completed + self.attended
  }
}
