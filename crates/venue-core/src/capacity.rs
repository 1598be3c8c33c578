//! Capacity configuration: the administrator-owned ceiling for a resource.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Which calendar days a config accepts reservations on.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Eligibility {
  #[default]
  AnyDay,
  WeekdayOnly,
}

impl Eligibility {
  pub fn admits(self, date: NaiveDate) -> bool {
    match self {
      Self::AnyDay => true,
      Self::WeekdayOnly => !matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
    }
  }
}

/// The ceiling on units that may be held at once for every reservation key
/// governed by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityConfig<K> {
  pub key:         K,
  pub max_units:   u32,
  /// Inactive configs accept no reservations and are hidden from listings.
  pub active:      bool,
  pub eligibility: Eligibility,
  /// Reservations are refused at or after this instant.
  pub closes_at:   Option<DateTime<Utc>>,
  /// Human-readable name, e.g. an activity title.
  pub label:       Option<String>,
  pub updated_at:  DateTime<Utc>,
}

impl<K> CapacityConfig<K> {
  /// An active, any-day config with no deadline.
  pub fn new(key: K, max_units: u32) -> Self {
    Self {
      key,
      max_units,
      active: true,
      eligibility: Eligibility::default(),
      closes_at: None,
      label: None,
      updated_at: Utc::now(),
    }
  }

  pub fn with_eligibility(mut self, eligibility: Eligibility) -> Self {
    self.eligibility = eligibility;
    self
  }

  pub fn with_closes_at(mut self, closes_at: Option<DateTime<Utc>>) -> Self {
    self.closes_at = closes_at;
    self
  }

  pub fn with_label(mut self, label: impl Into<String>) -> Self {
    self.label = Some(label.into());
    self
  }

  pub fn inactive(mut self) -> Self {
    self.active = false;
    self
  }
}
