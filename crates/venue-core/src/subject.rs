//! Subjects, the parties who hold reservations.
//!
//! Authentication happens elsewhere. The booking core only ever sees an
//! already-resolved [`Caller`], and keeps a registry of live subject ids so it
//! can recognise reservations left behind by deleted accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// A live subject as recorded in the store's registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
  pub subject_id:    Uuid,
  pub registered_at: DateTime<Utc>,
}

/// The identity and role of whoever issued the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
  pub subject_id: Uuid,
  pub is_admin:   bool,
}

impl Caller {
  pub fn subject(subject_id: Uuid) -> Self {
    Self { subject_id, is_admin: false }
  }

  pub fn admin(subject_id: Uuid) -> Self {
    Self { subject_id, is_admin: true }
  }

  pub fn require_admin(&self) -> Result<()> {
    if self.is_admin {
      Ok(())
    } else {
      Err(Error::Forbidden("administrator role required".into()))
    }
  }

  /// Owners may read their own reservations; administrators may read any.
  pub fn may_access(&self, owner: Uuid) -> bool {
    self.is_admin || self.subject_id == owner
  }
}
