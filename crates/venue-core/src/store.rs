//! The `BookingStore` trait and the outcomes of its atomic operations.
//!
//! The trait is implemented by storage backends (e.g. `venue-store-sqlite`).
//! The booking services depend on this abstraction, not on any concrete
//! backend.
//!
//! Consumed capacity is never stored as a counter. It is always the sum of
//! `units` over the active reservations for a key, recomputed inside the same
//! transaction that admits a new reservation.

use std::{collections::HashMap, future::Future};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  capacity::CapacityConfig,
  reservation::{
    NewReservation, Reservation, ReservationQuery, ReservationStatus,
    StatusCounts, StatusUpdate,
  },
  resource::Resource,
  subject::Subject,
};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Infrastructure errors raised by a backend.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// Whether the failure was a transient write conflict (lock contention,
  /// serialization failure) that is worth retrying.
  fn is_conflict(&self) -> bool;
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of [`BookingStore::try_reserve`]. Every variant other than
/// `Reserved` left the store untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome<K> {
  Reserved(Reservation<K>),
  /// The config vanished or was deactivated before commit.
  UnknownResource,
  /// The subject already holds this active reservation on the key.
  Duplicate { existing: Uuid },
  CapacityExceeded { available: u32 },
}

/// Result of [`BookingStore::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome<K> {
  Released(Reservation<K>),
  NotFound,
  AlreadyCancelled,
  Immutable(ReservationStatus),
}

/// Result of [`BookingStore::update_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome<K> {
  Updated(Reservation<K>),
  NotFound,
  Illegal { from: ReservationStatus },
}

/// Result of [`BookingStore::put_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOutcome<K> {
  Saved(CapacityConfig<K>),
  /// Some key governed by the config already holds more units than the new
  /// ceiling.
  BelowConsumed { consumed: u32 },
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a booking store backend.
///
/// Every method that mutates reservations is a single transaction. Methods
/// are generic over the [`Resource`] family so one backend serves visits and
/// activities alike; rows of one family are invisible to the other.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait BookingStore: Send + Sync {
  type Error: StoreError;

  // ── Capacity configs ──────────────────────────────────────────────────

  /// Insert or replace the config for `config.key`.
  fn put_config<R: Resource>(
    &self,
    config: CapacityConfig<R::ConfigKey>,
  ) -> impl Future<Output = Result<ConfigOutcome<R::ConfigKey>, Self::Error>>
  + Send
  + '_;

  /// Fetch a config regardless of whether it is active.
  fn get_config<R: Resource>(
    &self,
    key: R::ConfigKey,
  ) -> impl Future<
    Output = Result<Option<CapacityConfig<R::ConfigKey>>, Self::Error>,
  > + Send
  + '_;

  /// All configs of this family, ascending by key.
  fn list_configs<R: Resource>(
    &self,
  ) -> impl Future<Output = Result<Vec<CapacityConfig<R::ConfigKey>>, Self::Error>>
  + Send
  + '_;

  // ── Ledger ────────────────────────────────────────────────────────────

  /// Units held by active reservations on `key`.
  fn consumed_units<R: Resource>(
    &self,
    key: R::Key,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + '_;

  /// [`Self::consumed_units`] for many keys in one snapshot. Keys with no
  /// active reservations are absent from the map.
  fn consumed_units_many<R: Resource>(
    &self,
    keys: Vec<R::Key>,
  ) -> impl Future<Output = Result<HashMap<R::Key, u32>, Self::Error>> + Send + '_;

  /// Atomically check the duplicate-active rule and remaining capacity, and
  /// insert `intent` if both pass.
  ///
  /// The subject is registered as live as part of the same transaction.
  fn try_reserve<R: Resource>(
    &self,
    intent: NewReservation<R::Key>,
  ) -> impl Future<Output = Result<ReserveOutcome<R::Key>, Self::Error>> + Send + '_;

  /// Cancel reservation `id`, returning its units to the pool.
  ///
  /// With `owner` set, reservations held by anyone else report `NotFound`.
  fn release<R: Resource>(
    &self,
    id: Uuid,
    owner: Option<Uuid>,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<ReleaseOutcome<R::Key>, Self::Error>> + Send + '_;

  /// Apply an administrator edit, enforcing [`Resource::can_transition`].
  /// Setting the status a reservation already has is a no-op for the status.
  fn update_status<R: Resource>(
    &self,
    id: Uuid,
    update: StatusUpdate,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<UpdateOutcome<R::Key>, Self::Error>> + Send + '_;

  /// Physically delete a reservation. Returns `false` if it did not exist.
  fn purge<R: Resource>(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get_reservation<R: Resource>(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Reservation<R::Key>>, Self::Error>>
  + Send
  + '_;

  /// Reservations matching `query`, newest first.
  fn list_reservations<R: Resource>(
    &self,
    query: ReservationQuery,
  ) -> impl Future<Output = Result<Vec<Reservation<R::Key>>, Self::Error>>
  + Send
  + '_;

  fn count_by_status<R: Resource>(
    &self,
  ) -> impl Future<Output = Result<StatusCounts, Self::Error>> + Send + '_;

  // ── Subject registry ──────────────────────────────────────────────────

  /// Record `subject_id` as live. Idempotent.
  fn register_subject(
    &self,
    subject_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Subject, Self::Error>> + Send + '_;

  /// Hard-delete a subject. Its reservations stay behind as orphans until
  /// reconciled. Returns `false` if the subject was not registered.
  fn remove_subject(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Reconciliation ────────────────────────────────────────────────────

  /// Cancel every active reservation on `key` whose subject is no longer
  /// registered. Returns the ids cancelled; empty when there were none.
  fn cancel_orphans<R: Resource>(
    &self,
    key: R::Key,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// Keys that currently hold at least one orphaned active reservation.
  fn orphaned_keys<R: Resource>(
    &self,
  ) -> impl Future<Output = Result<Vec<R::Key>, Self::Error>> + Send + '_;
}
