//! The reservation service shared by visit slots and activity seats.

use std::{future::Future, marker::PhantomData, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use uuid::Uuid;
use venue_core::{
  Error, Result,
  capacity::CapacityConfig,
  clock::Clock,
  reservation::{
    ContactInfo, NewReservation, Reservation, ReservationQuery,
    ReservationStatus, StatusCounts, StatusUpdate,
  },
  resource::{Activity, Resource, Visit},
  store::{
    BookingStore, ConfigOutcome, ReleaseOutcome, ReserveOutcome, StoreError,
    UpdateOutcome,
  },
  subject::Caller,
};

use crate::{availability::AvailabilityListing, locks::KeyLocks};

/// How long a request waits for a busy key before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Books visit slots. Reservations start `pending`.
pub type SlotBookingService<S> = ReservationService<Visit, S>;

/// Registers activity seats. Reservations start `confirmed`.
pub type SeatRegistrationService<S> = ReservationService<Activity, S>;

/// Per-row result of [`ReservationService::admin_bulk_update_status`].
#[derive(Debug)]
pub struct BulkItem<K> {
  pub id:     Uuid,
  pub result: Result<Reservation<K>>,
}

/// Capacity-constrained booking over one [`Resource`] family.
///
/// Mutations of a key are serialised by an in-process lock on that key; the
/// store transaction re-checks capacity at commit regardless.
pub struct ReservationService<R: Resource, S> {
  store:     Arc<S>,
  clock:     Arc<dyn Clock>,
  locks:     Arc<KeyLocks<R::Key>>,
  _resource: PhantomData<fn() -> R>,
}

impl<R: Resource, S> Clone for ReservationService<R, S> {
  fn clone(&self) -> Self {
    Self {
      store:     Arc::clone(&self.store),
      clock:     Arc::clone(&self.clock),
      locks:     Arc::clone(&self.locks),
      _resource: PhantomData,
    }
  }
}

fn store_error<E: StoreError>(e: E) -> Error { Error::Store(Box::new(e)) }

impl<R, S> ReservationService<R, S>
where
  R: Resource,
  S: BookingStore,
{
  pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      locks: Arc::new(KeyLocks::new(DEFAULT_LOCK_TIMEOUT)),
      _resource: PhantomData,
    }
  }

  /// Replace the key-lock timeout. Existing clones keep their old locks.
  pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
    self.locks = Arc::new(KeyLocks::new(timeout));
    self
  }

  pub fn timezone(&self) -> Tz { self.clock.timezone() }

  fn now_utc(&self) -> DateTime<Utc> { self.clock.now().with_timezone(&Utc) }

  /// Run a store call, retrying it once if the backend reports a write
  /// conflict.
  async fn with_retry<T, F, Fut>(&self, op: &str, call: F) -> Result<T>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, S::Error>>,
  {
    match call().await {
      Ok(value) => Ok(value),
      Err(e) if e.is_conflict() => {
        tracing::debug!(kind = %R::KIND, op, error = %e, "store conflict, retrying once");
        match call().await {
          Ok(value) => Ok(value),
          Err(e) if e.is_conflict() => Err(Error::Conflict(format!("{op}: {e}"))),
          Err(e) => Err(store_error(e)),
        }
      }
      Err(e) => Err(store_error(e)),
    }
  }

  /// The active config governing `key`.
  async fn active_config(
    &self,
    key: &R::Key,
  ) -> Result<CapacityConfig<R::ConfigKey>> {
    match self
      .store
      .get_config::<R>(R::config_key(key))
      .await
      .map_err(store_error)?
    {
      Some(config) if config.active => Ok(config),
      _ => Err(Error::UnknownResourceKey(key.to_string())),
    }
  }

  async fn find(&self, id: Uuid) -> Result<Reservation<R::Key>> {
    self
      .store
      .get_reservation::<R>(id)
      .await
      .map_err(store_error)?
      .ok_or(Error::ReservationNotFound(id))
  }

  // ── Availability ──────────────────────────────────────────────────────────

  /// Open keys matching `filter`, with their current consumption.
  pub async fn list_availability(
    &self,
    filter: R::Filter,
  ) -> Result<AvailabilityListing<R::Key>> {
    let now = self.clock.now();
    let configs = self.store.list_configs::<R>().await.map_err(store_error)?;

    let open = configs
      .iter()
      .filter(|config| config.active)
      .filter_map(|config| {
        let key = R::key_for(config, &filter)?;
        R::check_open(&key, config, &now)
          .is_ok()
          .then_some((key, config.max_units))
      })
      .collect::<Vec<_>>();
    if open.is_empty() {
      return Ok(AvailabilityListing::default());
    }

    let keys = open.iter().map(|(key, _)| key.clone()).collect();
    let consumed = self
      .store
      .consumed_units_many::<R>(keys)
      .await
      .map_err(store_error)?;
    Ok(AvailabilityListing::new(open, consumed))
  }

  /// Units still free on `key`.
  pub async fn available_units(&self, key: R::Key) -> Result<u32> {
    let config = self.active_config(&key).await?;
    let consumed = self
      .store
      .consumed_units::<R>(key)
      .await
      .map_err(store_error)?;
    Ok(config.max_units.saturating_sub(consumed))
  }

  // ── Subject operations ────────────────────────────────────────────────────

  /// Reserve `units` on `key` for `subject_id`.
  ///
  /// Checks run in order and stop at the first failure: the key must be
  /// open, `units` positive and contact details present where the resource
  /// requires them, then the store admits the reservation only if the
  /// subject holds no other active one on the key and enough units remain.
  pub async fn reserve(
    &self,
    subject_id: Uuid,
    key: R::Key,
    units: u32,
    contact: Option<ContactInfo>,
  ) -> Result<Reservation<R::Key>> {
    let now = self.clock.now();
    let config = self.active_config(&key).await?;
    R::check_open(&key, &config, &now)?;

    if units == 0 {
      return Err(Error::Validation("units must be at least 1".into()));
    }
    let contact = contact.as_ref().and_then(ContactInfo::normalized);
    if R::REQUIRES_CONTACT && contact.is_none() {
      return Err(Error::Validation(
        "contact name and phone are required".into(),
      ));
    }

    let _guard = self.locks.lock(&key).await?;
    let now = now.with_timezone(&Utc);
    self.cancel_orphans_locked(&key, now).await?;

    let intent = NewReservation {
      id: Uuid::new_v4(),
      subject_id,
      key: key.clone(),
      units,
      status: R::INITIAL_STATUS,
      contact,
      created_at: now,
    };
    let outcome = self
      .with_retry("reserve", || self.store.try_reserve::<R>(intent.clone()))
      .await?;

    match outcome {
      ReserveOutcome::Reserved(reservation) => {
        tracing::info!(
          kind = %R::KIND,
          %key,
          id = %reservation.id,
          %subject_id,
          units,
          "reserved"
        );
        Ok(reservation)
      }
      ReserveOutcome::UnknownResource => {
        Err(Error::UnknownResourceKey(key.to_string()))
      }
      ReserveOutcome::Duplicate { existing } => {
        tracing::debug!(kind = %R::KIND, %key, %subject_id, "duplicate reservation");
        Err(Error::DuplicateActiveReservation { key: key.to_string(), existing })
      }
      ReserveOutcome::CapacityExceeded { available } => {
        tracing::debug!(kind = %R::KIND, %key, units, available, "capacity exceeded");
        Err(Error::CapacityExceeded {
          key: key.to_string(),
          requested: units,
          available,
        })
      }
    }
  }

  /// Cancel one of `subject_id`'s own reservations.
  ///
  /// Reservations held by someone else are reported as not found.
  pub async fn cancel(
    &self,
    subject_id: Uuid,
    id: Uuid,
  ) -> Result<Reservation<R::Key>> {
    let existing = self.find(id).await?;
    if existing.subject_id != subject_id {
      return Err(Error::ReservationNotFound(id));
    }

    let _guard = self.locks.lock(&existing.key).await?;
    let now = self.now_utc();
    let outcome = self
      .with_retry("cancel", || {
        self.store.release::<R>(id, Some(subject_id), now)
      })
      .await?;

    match outcome {
      ReleaseOutcome::Released(reservation) => {
        tracing::info!(
          kind = %R::KIND,
          key = %reservation.key,
          %id,
          units = reservation.units,
          "cancelled"
        );
        Ok(reservation)
      }
      ReleaseOutcome::NotFound => Err(Error::ReservationNotFound(id)),
      ReleaseOutcome::AlreadyCancelled => Err(Error::AlreadyCancelled(id)),
      ReleaseOutcome::Immutable(status) => Err(Error::Immutable { id, status }),
    }
  }

  /// Fetch one reservation. Only its owner and administrators may see it.
  pub async fn get(
    &self,
    caller: &Caller,
    id: Uuid,
  ) -> Result<Reservation<R::Key>> {
    let reservation = self.find(id).await?;
    if !caller.may_access(reservation.subject_id) {
      return Err(Error::Forbidden(format!(
        "reservation {id} belongs to another subject"
      )));
    }
    Ok(reservation)
  }

  /// The subject's own reservations, newest first.
  pub async fn list_mine(
    &self,
    subject_id: Uuid,
  ) -> Result<Vec<Reservation<R::Key>>> {
    self
      .store
      .list_reservations::<R>(ReservationQuery {
        subject_id: Some(subject_id),
        ..Default::default()
      })
      .await
      .map_err(store_error)
  }

  // ── Administration ────────────────────────────────────────────────────────

  pub async fn admin_list_all(
    &self,
    caller: &Caller,
    query: ReservationQuery,
  ) -> Result<Vec<Reservation<R::Key>>> {
    caller.require_admin()?;
    self
      .store
      .list_reservations::<R>(query)
      .await
      .map_err(store_error)
  }

  /// Change a reservation's status and/or notes. Ownership is not checked,
  /// lifecycle rules are.
  pub async fn admin_update_status(
    &self,
    caller: &Caller,
    id: Uuid,
    update: StatusUpdate,
  ) -> Result<Reservation<R::Key>> {
    caller.require_admin()?;
    if update.status.is_none() && update.notes.is_none() {
      return Err(Error::Validation("nothing to update".into()));
    }
    self.update_one(id, update).await
  }

  async fn update_one(
    &self,
    id: Uuid,
    update: StatusUpdate,
  ) -> Result<Reservation<R::Key>> {
    let existing = self.find(id).await?;
    let _guard = self.locks.lock(&existing.key).await?;
    let now = self.now_utc();
    let outcome = self
      .with_retry("update status", || {
        self.store.update_status::<R>(id, update.clone(), now)
      })
      .await?;

    match outcome {
      UpdateOutcome::Updated(reservation) => {
        if reservation.status != existing.status {
          tracing::info!(
            kind = %R::KIND,
            %id,
            from = %existing.status,
            to = %reservation.status,
            "status changed"
          );
        }
        Ok(reservation)
      }
      UpdateOutcome::NotFound => Err(Error::ReservationNotFound(id)),
      UpdateOutcome::Illegal { from } => Err(Error::IllegalTransition {
        from,
        to: update.status.unwrap_or(from),
      }),
    }
  }

  /// Apply `status` to each reservation in `ids`, one at a time.
  ///
  /// Every row is its own transaction under its own key lock; a failing row
  /// is reported and the rest still run. Repeated ids are applied once.
  pub async fn admin_bulk_update_status(
    &self,
    caller: &Caller,
    ids: Vec<Uuid>,
    status: ReservationStatus,
  ) -> Result<Vec<BulkItem<R::Key>>> {
    caller.require_admin()?;

    let mut seen = std::collections::HashSet::new();
    let mut items = Vec::with_capacity(ids.len());
    for id in ids.into_iter().filter(|id| seen.insert(*id)) {
      let update = StatusUpdate { status: Some(status), notes: None };
      let result = self.update_one(id, update).await;
      items.push(BulkItem { id, result });
    }

    let failed = items.iter().filter(|item| item.result.is_err()).count();
    tracing::info!(
      kind = %R::KIND,
      %status,
      total = items.len(),
      failed,
      "bulk status update"
    );
    Ok(items)
  }

  /// Physically delete a reservation.
  pub async fn admin_purge(&self, caller: &Caller, id: Uuid) -> Result<()> {
    caller.require_admin()?;
    let existing = self.find(id).await?;
    let _guard = self.locks.lock(&existing.key).await?;

    let deleted = self
      .with_retry("purge", || self.store.purge::<R>(id))
      .await?;
    if !deleted {
      return Err(Error::ReservationNotFound(id));
    }
    tracing::info!(kind = %R::KIND, %id, status = %existing.status, "purged");
    Ok(())
  }

  /// Create or replace a capacity config.
  ///
  /// The ceiling may not drop below the units already held on any key the
  /// config governs.
  pub async fn admin_put_config(
    &self,
    caller: &Caller,
    mut config: CapacityConfig<R::ConfigKey>,
  ) -> Result<CapacityConfig<R::ConfigKey>> {
    caller.require_admin()?;
    if config.max_units == 0 {
      return Err(Error::Validation("max_units must be at least 1".into()));
    }
    config.label = config
      .label
      .map(|l| l.trim().to_owned())
      .filter(|l| !l.is_empty());
    config.updated_at = self.now_utc();

    let outcome = self
      .with_retry("put config", || self.store.put_config::<R>(config.clone()))
      .await?;
    match outcome {
      ConfigOutcome::Saved(config) => {
        tracing::info!(
          kind = %R::KIND,
          key = %config.key,
          max_units = config.max_units,
          active = config.active,
          "config saved"
        );
        Ok(config)
      }
      ConfigOutcome::BelowConsumed { consumed } => {
        Err(Error::Validation(format!(
          "max_units {} is below the {consumed} units already reserved",
          config.max_units
        )))
      }
    }
  }

  pub async fn admin_list_configs(
    &self,
    caller: &Caller,
  ) -> Result<Vec<CapacityConfig<R::ConfigKey>>> {
    caller.require_admin()?;
    self.store.list_configs::<R>().await.map_err(store_error)
  }

  pub async fn admin_counts(&self, caller: &Caller) -> Result<StatusCounts> {
    caller.require_admin()?;
    self.store.count_by_status::<R>().await.map_err(store_error)
  }

  // ── Reconciliation ────────────────────────────────────────────────────────

  /// Cancel active reservations on `key` whose subject no longer exists.
  /// Returns the ids cancelled; running it again finds nothing.
  pub async fn reconcile_orphans(&self, key: R::Key) -> Result<Vec<Uuid>> {
    let _guard = self.locks.lock(&key).await?;
    self.cancel_orphans_locked(&key, self.now_utc()).await
  }

  async fn cancel_orphans_locked(
    &self,
    key: &R::Key,
    at: DateTime<Utc>,
  ) -> Result<Vec<Uuid>> {
    let cancelled = self
      .with_retry("reconcile", || self.store.cancel_orphans::<R>(key.clone(), at))
      .await?;
    if !cancelled.is_empty() {
      tracing::warn!(
        kind = %R::KIND,
        %key,
        count = cancelled.len(),
        "cancelled reservations of removed subjects"
      );
    }
    Ok(cancelled)
  }

  /// Reconcile every key that currently holds orphans, each under its own
  /// lock. Keys that stay busy are skipped until the next sweep.
  pub async fn reconcile_all(&self) -> Result<Vec<Uuid>> {
    let keys = self.store.orphaned_keys::<R>().await.map_err(store_error)?;

    let mut cancelled = Vec::new();
    for key in keys {
      match self.reconcile_orphans(key.clone()).await {
        Ok(ids) => cancelled.extend(ids),
        Err(Error::Busy(_)) => {
          tracing::warn!(kind = %R::KIND, %key, "skipping busy key during sweep");
        }
        Err(e) => return Err(e),
      }
    }
    Ok(cancelled)
  }

  /// Hold `key`'s lock; for tests that need to observe contention.
  #[cfg(test)]
  pub(crate) async fn lock_key(
    &self,
    key: &R::Key,
  ) -> Result<crate::locks::KeyGuard> {
    self.locks.lock(key).await
  }
}
