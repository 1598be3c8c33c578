//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings in UTC. Keys are stored in
//! their `Display` form and parsed back through `FromStr`. UUIDs are stored as
//! hyphenated lowercase strings. Rows are decoded by column name into typed
//! `Raw*` structs first, then validated into domain types outside the
//! database thread.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use uuid::Uuid;
use venue_core::{
  capacity::{CapacityConfig, Eligibility},
  reservation::{ContactInfo, Reservation, ReservationStatus},
  resource::ResourceKind,
  subject::Subject,
};

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ──────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Keys and enums ──────────────────────────────────────────────────────────

pub fn decode_key<K>(s: &str) -> Result<K>
where
  K: FromStr<Err = venue_core::Error>,
{
  s.parse()
    .map_err(|e: venue_core::Error| Error::Decode(e.to_string()))
}

pub fn decode_status(s: &str) -> Result<ReservationStatus> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown reservation status: {s:?}")))
}

pub fn decode_kind(s: &str) -> Result<ResourceKind> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown resource kind: {s:?}")))
}

pub fn decode_eligibility(s: &str) -> Result<Eligibility> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown eligibility: {s:?}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawReservation::from_row`].
pub const RESERVATION_COLUMNS: &str = "reservation_id, subject_id, kind, \
   resource_key, units, status, contact_name, contact_phone, notes, \
   created_at, updated_at";

/// Raw values read directly from a `reservations` row.
pub struct RawReservation {
  pub reservation_id: String,
  pub subject_id:     String,
  pub kind:           String,
  pub resource_key:   String,
  pub units:          u32,
  pub status:         String,
  pub contact_name:   Option<String>,
  pub contact_phone:  Option<String>,
  pub notes:          Option<String>,
  pub created_at:     String,
  pub updated_at:     String,
}

impl RawReservation {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      reservation_id: row.get("reservation_id")?,
      subject_id:     row.get("subject_id")?,
      kind:           row.get("kind")?,
      resource_key:   row.get("resource_key")?,
      units:          row.get("units")?,
      status:         row.get("status")?,
      contact_name:   row.get("contact_name")?,
      contact_phone:  row.get("contact_phone")?,
      notes:          row.get("notes")?,
      created_at:     row.get("created_at")?,
      updated_at:     row.get("updated_at")?,
    })
  }

  pub fn into_reservation<K>(self) -> Result<Reservation<K>>
  where
    K: FromStr<Err = venue_core::Error>,
  {
    let contact = match (self.contact_name, self.contact_phone) {
      (Some(name), Some(phone)) => Some(ContactInfo { name, phone }),
      _ => None,
    };

    Ok(Reservation {
      id: decode_uuid(&self.reservation_id)?,
      subject_id: decode_uuid(&self.subject_id)?,
      kind: decode_kind(&self.kind)?,
      key: decode_key(&self.resource_key)?,
      units: self.units,
      status: decode_status(&self.status)?,
      contact,
      notes: self.notes,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Column list matching [`RawConfig::from_row`].
pub const CONFIG_COLUMNS: &str =
  "config_key, max_units, active, eligibility, closes_at, label, updated_at";

/// Raw values read directly from a `capacity_configs` row.
pub struct RawConfig {
  pub config_key:  String,
  pub max_units:   u32,
  pub active:      bool,
  pub eligibility: String,
  pub closes_at:   Option<String>,
  pub label:       Option<String>,
  pub updated_at:  String,
}

impl RawConfig {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      config_key:  row.get("config_key")?,
      max_units:   row.get("max_units")?,
      active:      row.get("active")?,
      eligibility: row.get("eligibility")?,
      closes_at:   row.get("closes_at")?,
      label:       row.get("label")?,
      updated_at:  row.get("updated_at")?,
    })
  }

  pub fn into_config<K>(self) -> Result<CapacityConfig<K>>
  where
    K: FromStr<Err = venue_core::Error>,
  {
    Ok(CapacityConfig {
      key:         decode_key(&self.config_key)?,
      max_units:   self.max_units,
      active:      self.active,
      eligibility: decode_eligibility(&self.eligibility)?,
      closes_at:   self.closes_at.as_deref().map(decode_dt).transpose()?,
      label:       self.label,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw values read directly from a `subjects` row.
pub struct RawSubject {
  pub subject_id:    String,
  pub registered_at: String,
}

impl RawSubject {
  pub fn into_subject(self) -> Result<Subject> {
    Ok(Subject {
      subject_id:    decode_uuid(&self.subject_id)?,
      registered_at: decode_dt(&self.registered_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use venue_core::resource::{SlotKey, TimeSlot};

  use super::*;

  #[test]
  fn keys_decode_from_their_display_form() {
    let key: SlotKey = "2024-06-01/09:00-10:00".parse().unwrap();
    let decoded: SlotKey = decode_key(&key.to_string()).unwrap();
    assert_eq!(decoded, key);

    assert!(matches!(decode_key::<TimeSlot>("noon"), Err(Error::Decode(_))));
  }

  #[test]
  fn unknown_status_is_a_decode_error() {
    assert!(matches!(decode_status("maybe"), Err(Error::Decode(_))));
    assert_eq!(decode_status("attended").unwrap(), ReservationStatus::Attended);
  }

  #[test]
  fn timestamps_round_trip_through_utc_text() {
    let dt = decode_dt("2024-06-01T09:30:00+08:00").unwrap();
    assert_eq!(encode_dt(dt), "2024-06-01T01:30:00+00:00");
  }
}
