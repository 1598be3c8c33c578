//! Error types for `venue-core`.
//!
//! Every variant is recoverable at the request boundary. [`Error::kind`]
//! classifies a variant for transport bindings that map errors to status
//! codes.

use thiserror::Error;
use uuid::Uuid;

use crate::reservation::ReservationStatus;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid input: {0}")]
  Validation(String),

  /// The key has no capacity config, or the config is inactive.
  #[error("unknown resource key: {0}")]
  UnknownResourceKey(String),

  /// The resource exists but no longer accepts reservations (past date,
  /// passed deadline, not offered on that day).
  #[error("resource {key} is closed: {reason}")]
  Closed { key: String, reason: String },

  #[error("reservation not found: {0}")]
  ReservationNotFound(Uuid),

  #[error("subject not found: {0}")]
  SubjectNotFound(Uuid),

  #[error(
    "capacity exceeded for {key}: requested {requested}, available {available}"
  )]
  CapacityExceeded {
    key:       String,
    requested: u32,
    available: u32,
  },

  #[error("subject already holds active reservation {existing} for {key}")]
  DuplicateActiveReservation { key: String, existing: Uuid },

  #[error("reservation {0} is already cancelled")]
  AlreadyCancelled(Uuid),

  #[error("reservation {id} is {status} and can no longer change")]
  Immutable { id: Uuid, status: ReservationStatus },

  #[error("illegal status change {from} -> {to}")]
  IllegalTransition {
    from: ReservationStatus,
    to:   ReservationStatus,
  },

  /// The per-key lock could not be acquired in time. Safe to retry.
  #[error("resource {0} is busy, retry later")]
  Busy(String),

  /// The store reported a write conflict that persisted after a retry.
  #[error("conflict: {0}")]
  Conflict(String),

  #[error("not permitted: {0}")]
  Forbidden(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Coarse classification of [`Error`] variants.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  NotFound,
  CapacityExceeded,
  DuplicateActiveReservation,
  StateTransition,
  Conflict,
  Authorization,
  Infrastructure,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) | Self::Closed { .. } => ErrorKind::Validation,
      Self::UnknownResourceKey(_)
      | Self::ReservationNotFound(_)
      | Self::SubjectNotFound(_) => ErrorKind::NotFound,
      Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
      Self::DuplicateActiveReservation { .. } => {
        ErrorKind::DuplicateActiveReservation
      }
      Self::AlreadyCancelled(_)
      | Self::Immutable { .. }
      | Self::IllegalTransition { .. } => ErrorKind::StateTransition,
      Self::Busy(_) | Self::Conflict(_) => ErrorKind::Conflict,
      Self::Forbidden(_) => ErrorKind::Authorization,
      Self::Store(_) => ErrorKind::Infrastructure,
    }
  }

  /// Whether the caller may reasonably retry the same request later.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self.kind(),
      ErrorKind::CapacityExceeded | ErrorKind::Conflict
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
